use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use httptest::matchers::{contains, request, url_decoded};
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server, all_of};
use predicates::prelude::*;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct TestEnv {
    tmp: TempDir,
}

impl TestEnv {
    fn new() -> Self {
        Self {
            tmp: TempDir::new().expect("create temp dir"),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.tmp.path().join(name)
    }

    fn config_path(&self) -> PathBuf {
        self.path("config.toml")
    }

    fn write_config(&self, server: &Server) {
        let config = format!(
            "default_provider = \"openweather\"\n\n\
             [providers.openweather]\n\
             api_key = \"TEST_KEY\"\n\
             base_url = \"{}\"\n",
            server.url_str("")
        );
        fs::write(self.config_path(), config).expect("write config");
    }

    /// Isolated from the caller's environment, home dir and any `.env`.
    fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("weather");
        cmd.env_clear()
            .env("HOME", self.tmp.path())
            .env("XDG_CONFIG_HOME", self.path("xdg-config"))
            .env("XDG_CACHE_HOME", self.path("xdg-cache"))
            .current_dir(self.tmp.path())
            .arg("--config")
            .arg(self.config_path());
        cmd
    }
}

fn seattle_body() -> Value {
    json!({
        "name": "Seattle",
        "main": { "temp": 18.0, "feels_like": 17.0, "humidity": 70 },
        "weather": [{ "description": "light rain" }]
    })
}

fn expect_city(server: &Server, city: &'static str, times: usize) {
    let matcher = all_of![
        request::method("GET"),
        request::path("/weather"),
        request::query(url_decoded(contains(("q", city)))),
    ];

    let expectation = Expectation::matching(matcher).times(times);
    if city == "Seattle" {
        server.expect(expectation.respond_with(json_encoded(seattle_body())));
    } else {
        server.expect(expectation.respond_with(
            status_code(404).body(r#"{"cod":"404","message":"city not found"}"#),
        ));
    }
}

fn csv_rows(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .expect("read csv log")
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn help_lists_batch_flags() {
    let env = TestEnv::new();
    env.cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--cache-day"))
        .stdout(predicate::str::contains("--csv-out"));
}

#[test]
fn missing_credential_is_a_configuration_error() {
    let env = TestEnv::new();
    env.cmd()
        .arg("Seattle")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"))
        .stderr(predicate::str::contains("OPENWEATHER_API_KEY"))
        .stdout(predicate::str::is_empty());
}

#[test]
fn zero_retries_is_rejected_before_any_lookup() {
    let env = TestEnv::new();
    env.cmd()
        .env("OPENWEATHER_API_KEY", "TEST_KEY")
        .args(["Seattle", "--retries", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("retries must be at least 1"));
}

#[test]
fn unknown_provider_is_rejected() {
    let env = TestEnv::new();
    env.cmd()
        .args(["Seattle", "--provider", "darksky"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown provider"));
}

#[test]
fn batch_run_prints_in_input_order_and_logs_once() {
    let env = TestEnv::new();
    let server = Server::run();
    env.write_config(&server);
    expect_city(&server, "Seattle", 1);
    expect_city(&server, "Nowhere123", 1);

    let log = env.path("weather_log.csv");
    env.cmd()
        .args(["Seattle", "Nowhere123", "Seattle", "--cache-day", "--backoff", "0"])
        .arg("--csv-out")
        .arg(&log)
        .assert()
        .success()
        .stdout(
            "Seattle: 18.00°C, Humidity 70%\n\
             Nowhere123: not found (check spelling)\n\
             Seattle: 18.00°C, Humidity 70%\n",
        );

    let rows = csv_rows(&log);
    assert_eq!(rows[0], "date,city,temp,units,humidity,feels_like,conditions");
    assert_eq!(rows.len(), 2);
    assert!(rows[1].contains(",Seattle,18.0,metric,70,17.0,light rain"));
}

#[test]
fn json_mode_emits_records_and_summary_on_stderr() {
    let env = TestEnv::new();
    let server = Server::run();
    env.write_config(&server);
    expect_city(&server, "Seattle", 1);

    let output = env
        .cmd()
        .args(["Seattle", "--json", "--summary", "--units", "metric"])
        .assert()
        .success()
        .stderr(predicate::str::contains("1 locations: 1 ok, 0 failed"))
        .get_output()
        .stdout
        .clone();

    let text = String::from_utf8(output).expect("utf-8 stdout");
    let records: Vec<Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).expect("json record"))
        .collect();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["ok"], true);
    assert_eq!(records[0]["input"], "Seattle");
    assert_eq!(records[0]["humidity"], 70);
}

#[test]
fn cities_file_is_merged_after_positionals() {
    let env = TestEnv::new();
    let server = Server::run();
    env.write_config(&server);
    expect_city(&server, "Seattle", 1);
    expect_city(&server, "Atlantis", 1);

    let cities = env.path("cities.txt");
    fs::write(&cities, "# extra\nAtlantis\n\n").expect("write cities file");

    env.cmd()
        .arg("Seattle")
        .arg("--cities-file")
        .arg(&cities)
        .args(["--quiet", "--backoff", "0"])
        .assert()
        .success()
        .stdout("Atlantis: not found (check spelling)\n");
}

#[test]
fn each_run_appends_one_summary_row() {
    let env = TestEnv::new();
    let server = Server::run();
    env.write_config(&server);
    expect_city(&server, "Seattle", 2);
    expect_city(&server, "Nowhere123", 2);

    let runs = env.path("logs").join("weather_runs.csv");
    for _ in 0..2 {
        env.cmd()
            .args(["Seattle", "Nowhere123", "--backoff", "0", "--run-log"])
            .arg(&runs)
            .assert()
            .success();
    }

    let rows = csv_rows(&runs);
    assert_eq!(
        rows[0],
        "timestamp,units,provider,cities,success_count,error_count,lookups,cache_hits,\
         rows_logged,csv_out"
    );
    assert_eq!(rows.len(), 3);
    assert!(rows[1].contains(",metric,openweather,Seattle;Nowhere123,1,1,2,0,0,"));
}

#[test]
fn no_run_log_leaves_no_file() {
    let env = TestEnv::new();
    let server = Server::run();
    env.write_config(&server);
    expect_city(&server, "Seattle", 1);

    let runs = env.path("weather_runs.csv");
    env.cmd()
        .env("RUN_LOG", &runs)
        .args(["Seattle", "--no-run-log"])
        .assert()
        .success();

    assert!(!runs.exists());
}
