//! Tests for line splitting and stream merging.

use cargo_lens::process::{output_lines, read_lines, OutputLine};
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn read_lines_strips_delimiters() {
    let (reader, mut writer) = tokio::io::duplex(1024);

    tokio::spawn(async move {
        writer.write_all(b"first\r\nsecond\n\nthird").await.unwrap();
        drop(writer);
    });

    let lines: Vec<String> = read_lines(reader).collect().await;
    assert_eq!(lines, vec!["first", "second", "", "third"]);
}

#[tokio::test]
async fn read_lines_waits_for_newline() {
    let (reader, mut writer) = tokio::io::duplex(1024);
    let mut lines = Box::pin(read_lines(reader));

    writer.write_all(b"par").await.unwrap();
    writer.write_all(b"tial\nnext").await.unwrap();
    assert_eq!(lines.next().await.as_deref(), Some("partial"));

    drop(writer);
    assert_eq!(lines.next().await.as_deref(), Some("next"));
    assert_eq!(lines.next().await, None);
}

#[tokio::test]
async fn read_lines_replaces_invalid_utf8() {
    let (reader, mut writer) = tokio::io::duplex(1024);

    tokio::spawn(async move {
        writer.write_all(b"ok\n\xff\xfe bad\n").await.unwrap();
    });

    let lines: Vec<String> = read_lines(reader).collect().await;
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "ok");
    assert!(lines[1].ends_with(" bad"));
}

#[tokio::test]
async fn output_lines_tags_streams() {
    let (out_reader, mut out_writer) = tokio::io::duplex(1024);
    let (err_reader, mut err_writer) = tokio::io::duplex(1024);

    tokio::spawn(async move {
        out_writer.write_all(b"{\"reason\":\"x\"}\nplain\n").await.unwrap();
        err_writer.write_all(b"warning: noise\n").await.unwrap();
    });

    let lines: Vec<OutputLine> = output_lines(out_reader, err_reader).collect().await;

    assert_eq!(lines.len(), 3);
    let stdout: Vec<_> = lines
        .iter()
        .filter(|l| matches!(l, OutputLine::Stdout(_)))
        .map(OutputLine::text)
        .collect();
    assert_eq!(stdout, vec!["{\"reason\":\"x\"}", "plain"]);
    assert!(lines.contains(&OutputLine::Stderr("warning: noise".to_string())));
}
