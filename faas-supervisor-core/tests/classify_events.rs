use faas_supervisor_core::event::{classify, classify_str, try_classify, Provenance, RawPayload};
use serde_json::{json, Value};

fn s3_record(source: &str, key: &str) -> Value {
    json!({
        "Records": [{
            "eventVersion": "2.0",
            "eventSource": source,
            "awsRegion": "us-east-1",
            "eventTime": "2019-03-21T11:22:32.000Z",
            "eventName": "s3:ObjectCreated:Put",
            "s3": {
                "bucket": {"name": "files", "arn": "arn:aws:s3:::files"},
                "object": {"key": key, "size": 17042}
            }
        }]
    })
}

#[test]
fn aws_event_decodes_key() {
    let c = classify(s3_record("aws:s3", "a%20b.jpg"));
    let e = c.event;
    assert_eq!(e.provenance, Provenance::S3);
    assert_eq!(e.object_key.as_deref(), Some("a b.jpg"));
    assert_eq!(e.display_name.as_deref(), Some("a b.jpg"));
    assert_eq!(e.container_id.as_deref(), Some("files"));
    assert_eq!(e.event_time.as_deref(), Some("2019-03-21T11:22:32.000Z"));
}

#[test]
fn minio_event_uses_last_key_segment_as_name() {
    let e = classify(s3_record("minio:s3", "input/dog+1.jpg")).event;
    assert_eq!(e.provenance, Provenance::Minio);
    assert_eq!(e.object_key.as_deref(), Some("input/dog 1.jpg"));
    assert_eq!(e.display_name.as_deref(), Some("dog 1.jpg"));
}

#[test]
fn onedata_event() {
    let payload = json!({
        "Key": "/my-onedata-space/files/file.txt",
        "Records": [{
            "objectKey": "file.txt",
            "objectId": "0000034500046EE9C67756964233836666",
            "eventTime": "2019-02-07T09:51:02.7Z",
            "eventSource": "OneTrigger"
        }]
    });
    let e = classify(payload).event;
    assert_eq!(e.provenance, Provenance::Onedata);
    assert_eq!(e.object_key.as_deref(), Some("/my-onedata-space/files/file.txt"));
    assert_eq!(e.display_name.as_deref(), Some("file.txt"));
    assert_eq!(e.event_time.as_deref(), Some("2019-02-07T09:51:02.7Z"));
}

#[test]
fn dcache_event_has_no_time() {
    let payload = json!({
        "subscription": "https://dcache.example.org:3880/api/v1/events/channels/x/subscriptions/inotify/y",
        "event": {"name": "file.txt", "mask": ["IN_CLOSE_WRITE"]}
    });
    let e = classify(payload).event;
    assert_eq!(e.provenance, Provenance::DCache);
    assert_eq!(e.object_key.as_deref(), Some("file.txt"));
    assert_eq!(e.event_time, None);
}

#[test]
fn rucio_event_keeps_scope_and_token() {
    let payload = json!({
        "event_type": "transfer-done",
        "payload": {"scope": "user.jdoe", "name": "data.h5", "token": "tkn"}
    });
    let e = classify(payload).event;
    assert_eq!(e.provenance, Provenance::Rucio);
    assert_eq!(e.object_key.as_deref(), Some("data.h5"));
    assert_eq!(e.container_id.as_deref(), Some("user.jdoe"));
    assert_eq!(e.token.as_deref(), Some("tkn"));
}

#[test]
fn gateway_wrapping_storage_event_yields_inner_dialect() {
    let payload = json!({
        "httpMethod": "POST",
        "headers": {"Content-Type": "application/json"},
        "body": s3_record("minio:s3", "files/img.png").to_string()
    });
    let e = classify(payload).event;
    assert_eq!(e.provenance, Provenance::Minio);
    assert_eq!(e.object_key.as_deref(), Some("files/img.png"));
}

#[test]
fn gateway_with_plain_body_stays_gateway() {
    let payload = json!({
        "httpMethod": "POST",
        "headers": {"Content-Type": "text/csv"},
        "body": "a,b\n1,2\n"
    });
    let e = classify(payload).event;
    assert_eq!(e.provenance, Provenance::ApiGateway);
    assert_eq!(e.raw, RawPayload::Text("a,b\n1,2\n".into()));
}

#[test]
fn delegated_event_carries_provider_hint() {
    let payload = json!({
        "storage_provider": "minio.cluster2",
        "event": s3_record("minio:s3", "files/img.png").to_string()
    });
    let e = classify(payload).event;
    assert_eq!(e.provenance, Provenance::Minio);
    assert_eq!(e.auth_hint.as_deref(), Some("minio.cluster2"));
}

#[test]
fn delegated_event_without_hint() {
    let payload = json!({"event": s3_record("aws:s3", "x.txt")});
    let e = classify(payload).event;
    assert_eq!(e.provenance, Provenance::S3);
    assert_eq!(e.auth_hint, None);
}

#[test]
fn unknown_source_is_reported_then_downgraded() {
    let payload = s3_record("gcs:storage", "x");
    assert!(try_classify(payload.clone()).unwrap_err().is_warning());
    assert_eq!(classify(payload).event.provenance, Provenance::Unknown);
}

#[test]
fn opaque_text_round_trips() {
    let text = "not json at all {";
    let e = classify_str(text).event;
    assert_eq!(e.provenance, Provenance::Unknown);
    assert_eq!(e.object_key, None);
    assert_eq!(e.raw.to_bytes().unwrap(), text.as_bytes());
}

#[test]
fn plain_mapping_is_unknown() {
    let e = classify(json!({"hello": "world"})).event;
    assert_eq!(e.provenance, Provenance::Unknown);
    assert_eq!(e.raw, RawPayload::Json(json!({"hello": "world"})));
}
