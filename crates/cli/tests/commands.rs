use std::io::Write;

use arbor_cli::commands::{demo, route, validate};

#[test]
fn demo_greets_on_greeting_input() {
    let result = demo::run("hello there");
    assert_eq!(result.exit_code, 0, "output: {}", result.output);
    assert!(result.output.contains("Hello! How can I help you today?"));
}

#[test]
fn demo_adds_two_numbers() {
    let result = demo::run("calculate 2 5");
    assert_eq!(result.exit_code, 0, "output: {}", result.output);
    assert!(result.output.contains("7.0") || result.output.contains("\"output\": 7"));
}

#[test]
fn demo_reports_failure_for_unroutable_input() {
    let result = demo::run("qwzx");
    assert_eq!(result.exit_code, 1);
    assert!(result.output.contains("\"success\": false"));
}

#[test]
fn validate_accepts_a_sound_description() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(
        file,
        r#"{{
            "roots": [{{
                "name": "router",
                "type": "classifier",
                "children": [
                    {{"name": "greet", "type": "action", "handler": "greet"}},
                    {{"name": "goodbye", "type": "action", "handler": "goodbye"}}
                ]
            }}]
        }}"#
    )
    .expect("write description");

    let result = validate::run(file.path());
    assert_eq!(result.exit_code, 0, "output: {}", result.output);
    assert!(result.output.contains("\"total_nodes\": 3"));
}

#[test]
fn validate_unreadable_file_exits_two() {
    let result = validate::run(std::path::Path::new("/nonexistent/graph.json"));
    assert_eq!(result.exit_code, 2);
    assert!(result.output.contains("\"error_class\":\"load\""));
}

#[test]
fn route_flows_through_a_loaded_graph() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(
        file,
        r#"{{
            "roots": [{{
                "name": "router",
                "type": "classifier",
                "children": [
                    {{"name": "greet", "type": "action", "handler": "greet"}}
                ]
            }}]
        }}"#
    )
    .expect("write description");

    let result = route::run(file.path(), "please greet everyone");
    assert_eq!(result.exit_code, 0, "output: {}", result.output);
    assert!(result.output.contains("\"success\": true"));
}
