use std::error::Error;

use signup_autofill::autofill::session::FillSession;
use signup_autofill::browser::{BrowserSession, LaunchOptions};
use signup_autofill::config::FillConfig;
use signup_autofill::dom::cdp::CdpDom;
use signup_autofill::dom::{Dom, Selector};
use signup_autofill::store::{MemoryStore, Profile};

const FORM_HTML: &str = r#"
<form>
  <div role="list">
    <div role="listitem">
      <div role="heading">Name *</div>
      <div><input type="text" id="name"></div>
    </div>
    <div role="listitem">
      <div role="heading">Would you like to challenge, battle, or challenge as a team? *</div>
      <div role="radiogroup">
        <label><input type="radio" name="kind" id="kind-challenge" disabled> Chalenge</label>
        <label><input type="radio" name="kind" id="kind-battle"> Battle</label>
        <label><input type="radio" name="kind" id="kind-team"> Challenge as a team</label>
      </div>
    </div>
    <div role="listitem">
      <div role="heading">Practice Attendance *</div>
      <div>
        <label><input type="checkbox" aria-label="Monday"> Monday</label>
        <label><input type="checkbox" aria-label="Tuesday"> Tuesday</label>
        <label><input type="checkbox" aria-label="Wednesday"> Wednesday</label>
      </div>
    </div>
  </div>
</form>
"#;

async fn run_smoke() -> Result<(), Box<dyn Error + Send + Sync>> {
    let browser = BrowserSession::launch(&LaunchOptions {
        headless: true,
        profile_dir: Some(std::env::temp_dir().join(format!(
            "signup-autofill-smoke-{}",
            std::process::id()
        ))),
        ..LaunchOptions::default()
    })
    .await?;
    let result = async {
        browser.navigate("about:blank").await?;
        let markup = serde_json::to_string(FORM_HTML)?;
        browser
            .page()
            .evaluate(format!("document.body.innerHTML = {markup}"))
            .await?;
        let dom = CdpDom::attach(browser.page().clone()).await?;
        let store = MemoryStore::with_profile(Profile {
            full_name: "Jane Doe".into(),
            challenge_type: "challenge".into(),
            practice_days: vec!["Monday".into(), "Wednesday".into()],
            ..Profile::default()
        });
        let mut session = FillSession::load(&store, FillConfig::default()).await;
        let report = session
            .detect_and_fill(&dom, &store)
            .await
            .ok_or("expected a fill pass")?;
        assert_eq!(report.detected, 3, "report: {report:?}");
        assert_eq!(report.filled, 3, "report: {report:?}");

        let name: String = browser
            .page()
            .evaluate("document.getElementById('name').value")
            .await?
            .into_value()?;
        assert_eq!(name, "Jane Doe");

        let challenge = dom
            .query_all(None, &[Selector::tag("input").attr_eq("id", "kind-challenge")])
            .await?;
        let state = dom.control_state(challenge[0]).await?;
        assert!(state.checked, "disabled radio should be enabled and selected");

        let checked: Vec<bool> = browser
            .page()
            .evaluate("Array.from(document.querySelectorAll('input[type=checkbox]')).map(c => c.checked)")
            .await?
            .into_value()?;
        assert_eq!(checked, vec![true, false, true]);
        Ok::<_, Box<dyn Error + Send + Sync>>(())
    }
    .await;
    browser.close().await;
    result
}

#[test]
#[ignore = "requires a local Chrome/Edge install; run periodically with --ignored"]
fn fills_a_form_in_a_real_browser() -> Result<(), Box<dyn Error + Send + Sync>> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_smoke())
}
