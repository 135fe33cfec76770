//! The edge must not rewrite bodies: no minification, recompression or
//! metadata stripping.

use super::{scenario, Scenario};
use crate::assertions::{response_not_manipulated, Fixture};
use crate::harness::Harness;
use crate::report::{CaseResult, TestCase};

macro_rules! fixture {
    ($file:literal) => {
        Fixture {
            name: $file,
            data: include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/", $file)),
        }
    };
}

const HTML: Fixture = fixture!("fixture.html");
const CSS: Fixture = fixture!("fixture.css");
const JS: Fixture = fixture!("fixture.js");
const PNG: Fixture = fixture!("fixture.png");
const JPEG: Fixture = fixture!("fixture.jpeg");
const GIF: Fixture = fixture!("fixture.gif");

pub(super) fn scenarios() -> Vec<Scenario> {
    vec![
        scenario!("nomanipulate_html", html),
        scenario!("nomanipulate_css", css),
        scenario!("nomanipulate_js", js),
        scenario!("nomanipulate_png", png),
        scenario!("nomanipulate_jpeg", jpeg),
        scenario!("nomanipulate_gif", gif),
    ]
}

async fn check(h: &Harness, case: &mut TestCase, fixture: Fixture) -> CaseResult {
    h.reset_for(case).await?;
    response_not_manipulated(h, case, &fixture).await
}

async fn html(h: &Harness, case: &mut TestCase) -> CaseResult {
    check(h, case, HTML).await
}

async fn css(h: &Harness, case: &mut TestCase) -> CaseResult {
    check(h, case, CSS).await
}

async fn js(h: &Harness, case: &mut TestCase) -> CaseResult {
    check(h, case, JS).await
}

async fn png(h: &Harness, case: &mut TestCase) -> CaseResult {
    check(h, case, PNG).await
}

async fn jpeg(h: &Harness, case: &mut TestCase) -> CaseResult {
    check(h, case, JPEG).await
}

async fn gif(h: &Harness, case: &mut TestCase) -> CaseResult {
    check(h, case, GIF).await
}
