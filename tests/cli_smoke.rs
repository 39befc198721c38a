use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

struct TestSandbox {
    root: PathBuf,
}

impl TestSandbox {
    fn new(prefix: &str) -> Result<Self, Box<dyn Error>> {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
        let root = std::env::temp_dir().join(format!(
            "signup-autofill-{prefix}-{}-{nanos}",
            std::process::id()
        ));
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path(&self) -> &Path {
        &self.root
    }
}

impl Drop for TestSandbox {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn run(store: &Path, args: &[&str]) -> Result<Output, Box<dyn Error>> {
    let output = Command::new(env!("CARGO_BIN_EXE_signup-autofill"))
        .args(args)
        .arg("--store")
        .arg(store)
        .arg("--quiet")
        .output()?;
    assert!(
        output.status.success(),
        "{args:?} failed:\nstdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(output)
}

#[test]
fn profile_and_settings_round_trip_through_the_store() -> Result<(), Box<dyn Error>> {
    let sandbox = TestSandbox::new("cli")?;
    let store = sandbox.path().join("store.json");

    run(
        &store,
        &[
            "profile",
            "set",
            "--full-name",
            "Jane Doe",
            "--challenge-type",
            "challenge",
            "--challenge-target",
            "Sam",
            "--practice-days",
            "Monday,Wednesday",
        ],
    )?;
    run(&store, &["profile", "set", "--partner-name", "Alex"])?;

    let shown = run(&store, &["profile", "show"])?;
    let profile: serde_json::Value = serde_json::from_slice(&shown.stdout)?;
    assert_eq!(profile["fullName"], "Jane Doe");
    assert_eq!(profile["partnerName"], "Alex");
    assert_eq!(
        profile["practiceDays"],
        serde_json::json!(["Monday", "Wednesday"])
    );

    let settings = run(&store, &["settings", "--auto-submit", "true"])?;
    let settings: serde_json::Value = serde_json::from_slice(&settings.stdout)?;
    assert_eq!(settings["autoFillEnabled"], true);
    assert_eq!(settings["autoSubmitEnabled"], true);

    run(&store, &["profile", "clear"])?;
    let stored: serde_json::Value = serde_json::from_str(&fs::read_to_string(&store)?)?;
    assert!(stored.get("userProfile").is_none());
    assert_eq!(stored["autoSubmitEnabled"], true);
    Ok(())
}

#[test]
fn profile_set_from_json_file() -> Result<(), Box<dyn Error>> {
    let sandbox = TestSandbox::new("cli-json")?;
    let store = sandbox.path().join("store.json");
    let source = sandbox.path().join("profile.json");
    fs::write(
        &source,
        r#"{"fullName":"Jane Doe","challengeType":"battle","challengeDays":["Friday"]}"#,
    )?;

    run(
        &store,
        &[
            "profile",
            "set",
            "--from-json",
            source.to_string_lossy().as_ref(),
            "--challenge-target",
            "Sam",
        ],
    )?;

    let stored: serde_json::Value = serde_json::from_str(&fs::read_to_string(&store)?)?;
    assert_eq!(stored["userProfile"]["challengeType"], "battle");
    assert_eq!(stored["userProfile"]["challengeTarget"], "Sam");
    assert_eq!(
        stored["userProfile"]["challengeDays"],
        serde_json::json!(["Friday"])
    );
    Ok(())
}
