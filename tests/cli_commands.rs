use clap::Parser;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

#[derive(Debug, Default)]
struct FakeTerminalClient;

impl blinky::TerminalClient for FakeTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        false
    }

    fn stderr_is_terminal(&self) -> bool {
        false
    }
}

async fn run_with_parsed_args(
    args: blinky::Args,
    output_format: blinky::OutputFormat,
) -> anyhow::Result<String> {
    args.validate()?;
    let profile = blinky::ProfileDescriptor::resolve(args.profile_path())?;
    let device = args.device();
    let (command, maybe_fake_args) = args.into_command_and_fake_args();
    let fake_args = maybe_fake_args.ok_or_else(|| anyhow::anyhow!("tests only run in fake mode"))?;
    let transport = blinky::fake_transport(fake_args, profile.clone()).await?;
    let manager = blinky::DeviceManager::new(transport, profile);

    let mut output = Vec::new();
    blinky::run_with_options(
        command,
        &mut output,
        &FakeTerminalClient,
        &manager,
        device,
        blinky::RunOptions::builder()
            .output_format(output_format)
            .build(),
    )
    .await?;
    Ok(String::from_utf8(output)?)
}

async fn run_json<const N: usize>(argv: [&str; N]) -> anyhow::Result<Vec<Value>> {
    let args = blinky::Args::try_parse_from(argv)?;
    let stdout = run_with_parsed_args(args, blinky::OutputFormat::Json).await?;
    stdout
        .lines()
        .map(|line| serde_json::from_str(line).map_err(anyhow::Error::from))
        .collect()
}

fn single(mut lines: Vec<Value>) -> Value {
    assert_eq!(1, lines.len(), "expected exactly one JSON document");
    lines.remove(0)
}

#[tokio::test]
async fn inspect_reports_supported_peripheral() -> anyhow::Result<()> {
    let report = single(run_json(["blinky", "--fake", "--fake-read", "01", "inspect"]).await?);

    assert_eq!(json!("supported"), report["verdict"]);
    assert_eq!(json!(true), report["button"]);
    assert_eq!(json!("FA:KE:00:00:00:01"), report["device"]["address"]);
    assert_eq!(
        json!([
            {"state": "connecting"},
            {"state": "initializing"},
            {"state": "ready"},
            {"state": "disconnecting"},
            {"state": "disconnected", "reason": "other"},
        ]),
        report["transitions"]
    );
    assert_eq!(
        json!(blinky::BLINKY_CONTROL_UUID.to_string()),
        report["profile"]["control"]
    );

    Ok(())
}

#[tokio::test]
async fn inspect_reports_unsupported_peripheral() -> anyhow::Result<()> {
    let report = single(run_json(["blinky", "--fake", "--fake-unsupported", "inspect"]).await?);

    assert_eq!(json!("not_supported"), report["verdict"]);
    assert_eq!(
        json!({"state": "disconnected", "reason": "not_supported"}),
        report["transitions"]
            .as_array()
            .and_then(|transitions| transitions.last())
            .cloned()
            .unwrap_or(Value::Null)
    );

    Ok(())
}

#[tokio::test]
async fn inspect_pretty_output_names_the_verdict() -> anyhow::Result<()> {
    let fake = blinky::FakeArgs::builder().initial_read("00")?.build();
    let args = blinky::Args::new(blinky::Command::Inspect)
        .with_address("C8:2B:96:A1:00:10")
        .with_fake(fake);

    let stdout = run_with_parsed_args(args, blinky::OutputFormat::Pretty).await?;

    assert!(stdout.contains("C8:2B:96:A1:00:10"));
    assert!(stdout.contains("supported"));
    assert!(stdout.contains("released"));
    assert!(stdout.contains(&blinky::BLINKY_TELEMETRY_UUID.to_string()));

    Ok(())
}

#[tokio::test]
async fn led_on_is_acknowledged() -> anyhow::Result<()> {
    let report = single(run_json(["blinky", "--fake", "led", "on"]).await?);

    assert_eq!(json!({"action": "led", "on": true}), report["request"]);
    assert_eq!(json!({"outcome": "acknowledged", "ack": "01"}), report["result"]);
    assert_eq!(json!(true), report["led"]);

    Ok(())
}

#[tokio::test]
async fn led_off_on_fresh_session_is_skipped() -> anyhow::Result<()> {
    let report = single(run_json(["blinky", "--fake", "led", "off"]).await?);

    assert_eq!(json!({"outcome": "skipped"}), report["result"]);
    assert_eq!(json!(false), report["led"]);

    Ok(())
}

#[tokio::test]
async fn command_writes_its_table_payload() -> anyhow::Result<()> {
    let report = single(run_json(["blinky", "--fake", "command", "7"]).await?);

    assert_eq!(json!({"action": "command", "id": 7}), report["request"]);
    assert_eq!(
        json!({"outcome": "acknowledged", "ack": hex::encode(b"BT7")}),
        report["result"]
    );

    Ok(())
}

#[tokio::test]
async fn control_fails_on_unsupported_peripheral() {
    let result = run_json(["blinky", "--fake", "--fake-unsupported", "led", "on"]).await;

    let error = result.expect_err("a rejected peripheral cannot be controlled");
    assert!(
        format!("{error:#}").contains("does not expose the required profile"),
        "unexpected error: {error:#}"
    );
}

#[tokio::test]
async fn watch_stops_after_max_events() -> anyhow::Result<()> {
    let mut lines = run_json([
        "blinky",
        "--fake",
        "--fake-notifications",
        "01,00",
        "watch",
        "--max-events",
        "3",
    ])
    .await?;

    let summary = lines.pop().expect("watch prints a summary");
    assert_eq!(json!(3), summary["events"]);
    assert_eq!(json!("limit"), summary["stop_reason"]);
    assert_eq!(3, lines.len());
    for (index, event) in lines.iter().enumerate() {
        assert_eq!(json!(index), event["index"]);
        assert!(event["unix_ms"].is_u64());
    }
    assert_eq!(
        json!({"kind": "connection", "state": {"state": "connecting"}}),
        lines[0]["event"]
    );

    Ok(())
}

#[tokio::test]
async fn watch_stops_when_the_peripheral_is_rejected() -> anyhow::Result<()> {
    let mut lines = run_json(["blinky", "--fake", "--fake-unsupported", "watch"]).await?;

    let summary = lines.pop().expect("watch prints a summary");
    assert_eq!(json!("disconnected"), summary["stop_reason"]);
    let last_event = lines.last().expect("watch prints connection events");
    assert_eq!(
        json!({"kind": "connection", "state": {"state": "disconnected", "reason": "not_supported"}}),
        last_event["event"]
    );

    Ok(())
}

#[test]
fn invalid_fixture_is_rejected() {
    let result = blinky::FakeArgs::builder().initial_read("zz");
    assert!(matches!(result, Err(blinky::FixtureError::InvalidHex(_))));
}

#[test]
fn real_mode_requires_an_address() -> anyhow::Result<()> {
    let args = blinky::Args::try_parse_from(["blinky", "led", "on"])?;
    let error = args
        .validate()
        .expect_err("a real run must name its peripheral");
    assert_eq!(clap::error::ErrorKind::MissingRequiredArgument, error.kind());
    Ok(())
}
