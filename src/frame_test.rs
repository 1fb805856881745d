use super::*;
use serde_json::json;

#[test]
fn render_wraps_json_arguments() {
    let call = WbCall::new(WbMethod::CreateWb, json!({"wbId": 1, "name": "Whiteboard 2"}));
    assert_eq!(call.render(), r#"WbArea.createWb({"wbId":1,"name":"Whiteboard 2"});"#);
}

#[test]
fn render_bare_call_has_empty_arguments() {
    assert_eq!(WbCall::bare(WbMethod::Init).render(), "WbArea.init();");
}

#[test]
fn render_string_argument_is_quoted() {
    let call = WbCall::new(WbMethod::SetRole, json!("presenter"));
    assert_eq!(call.render(), r#"WbArea.setRole("presenter");"#);
}

#[test]
fn wb_frame_serializes_with_type_tag() {
    let frame = Frame::wb(&WbCall::new(WbMethod::ClearAll, json!({"wbId": 0})));
    let value = serde_json::to_value(&frame).expect("serialize");
    assert_eq!(value, json!({"type": "wb", "func": r#"WbArea.clearAll({"wbId":0});"#}));
}

#[test]
fn error_frame_serializes_with_message() {
    let value = serde_json::to_value(Frame::error("disk full")).expect("serialize");
    assert_eq!(value, json!({"type": "error", "message": "disk full"}));
    assert!(Frame::error("x").func().is_none());
}

#[test]
fn envelope_defaults_missing_obj_to_null() {
    let env: Envelope = serde_json::from_str(r#"{"action":"createWb"}"#).expect("parse");
    assert_eq!(env.action, "createWb");
    assert!(env.obj.is_null());
}

#[test]
fn envelope_requires_action() {
    assert!(serde_json::from_str::<Envelope>(r#"{"obj":{}}"#).is_err());
}
