use scn_core::ScenarioError;
use std::fmt::Display;

fn map_error(code: &'static str, error: impl Display) -> ScenarioError {
    ScenarioError::new(code, error.to_string())
}

pub(crate) fn emit_error(error: ScenarioError) -> i32 {
    println!("RESULT:ERROR");
    println!("ERROR_CODE:{}", error.code);
    println!(
        "ERROR_MSG_JSON:{}",
        serde_json::to_string(&error.message).expect("string json")
    );
    1
}

pub(crate) fn map_cli_source_path(error: std::io::Error) -> ScenarioError {
    map_error("CLI_SOURCE_PATH", error)
}

pub(crate) fn map_cli_source_scan(error: walkdir::Error) -> ScenarioError {
    map_error("CLI_SOURCE_SCAN", error)
}

pub(crate) fn map_cli_source_read(error: std::io::Error) -> ScenarioError {
    map_error("CLI_SOURCE_READ", error)
}

pub(crate) fn map_cli_scene_write(error: std::io::Error) -> ScenarioError {
    map_error("CLI_SCENE_WRITE", error)
}

pub(crate) fn map_cli_scene_encode(error: serde_json::Error) -> ScenarioError {
    map_error("CLI_SCENE_ENCODE", error)
}
