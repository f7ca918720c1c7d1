//! TwiML documents returned to the carrier.

use std::io::Cursor;

use anyhow::Context;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use voxbridge_core::types::InteractionSummary;

/// Call-setup document: connect the call to our media WebSocket.
pub fn stream_document(host: &str) -> anyhow::Result<String> {
    let url = format!("wss://{host}/media");
    let mut writer = response_writer()?;
    writer.write_event(Event::Start(BytesStart::new("Connect")))?;
    let mut stream = BytesStart::new("Stream");
    stream.push_attribute(("url", url.as_str()));
    writer.write_event(Event::Empty(stream))?;
    writer.write_event(Event::End(BytesEnd::new("Connect")))?;
    finish(writer)
}

/// Redirect the call to `url`, passing the interaction summary as a JSON
/// query parameter.
pub fn redirect_document(
    url: &str,
    param: &str,
    summary: &InteractionSummary,
) -> anyhow::Result<String> {
    let json = serde_json::to_string(summary).context("Failed to serialize interaction summary")?;
    let separator = if url.contains('?') { '&' } else { '?' };
    let target = format!("{url}{separator}{param}={}", urlencoding::encode(&json));

    let mut writer = response_writer()?;
    writer.write_event(Event::Start(BytesStart::new("Redirect")))?;
    writer.write_event(Event::Text(BytesText::new(&target)))?;
    writer.write_event(Event::End(BytesEnd::new("Redirect")))?;
    finish(writer)
}

pub fn hangup_document() -> anyhow::Result<String> {
    let mut writer = response_writer()?;
    writer.write_event(Event::Empty(BytesStart::new("Hangup")))?;
    finish(writer)
}

/// A writer positioned inside an open `<Response>` element.
fn response_writer() -> anyhow::Result<Writer<Cursor<Vec<u8>>>> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new("Response")))?;
    Ok(writer)
}

fn finish(mut writer: Writer<Cursor<Vec<u8>>>) -> anyhow::Result<String> {
    writer.write_event(Event::End(BytesEnd::new("Response")))?;
    let xml = String::from_utf8(writer.into_inner().into_inner())?;
    Ok(xml)
}
