//! A tagged OAI-PMH response envelope, parsed once from the wire format.
//!
//! Rather than exposing a dynamic document whose children are probed for
//! on demand, the whole response is parsed up front into one of three
//! variants, and the driver matches on the variant instead.

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::TransportError;

/// The three verbs the core driver issues. `ListSets` is part of the wire
/// surface but unused by the driver itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Identify,
    ListSets,
    ListRecords,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Identify => "Identify",
            Verb::ListSets => "ListSets",
            Verb::ListRecords => "ListRecords",
        }
    }
}

/// The header fields OAI-PMH guarantees on every `<record>`: identifier,
/// datestamp, and an optional `status="deleted"` attribute.
#[derive(Debug, Clone)]
pub struct RecordHeader {
    pub identifier: String,
    pub datestamp: String,
    pub status: Option<String>,
}

/// One `<record>` child of a `ListRecords` response. The metadata/about
/// subtree is carried as opaque raw XML text — the driver never looks inside
/// it; only a [`crate::writer::RecordWriter`] does.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub header: RecordHeader,
    pub xml: String,
}

/// The parsed response tree, tagged at the root. Exactly one of these shapes
/// can come back from a call to [`super::Communicator::request`].
#[derive(Debug, Clone)]
pub enum ResponseEnvelope {
    Identify {
        response_date: String,
        granularity: Option<String>,
    },
    ListRecords {
        response_date: String,
        records: Vec<RawRecord>,
        resumption_token: Option<String>,
    },
    Error {
        response_date: String,
        code: String,
        text: String,
    },
}

impl ResponseEnvelope {
    pub fn response_date(&self) -> &str {
        match self {
            ResponseEnvelope::Identify { response_date, .. }
            | ResponseEnvelope::ListRecords { response_date, .. }
            | ResponseEnvelope::Error { response_date, .. } => response_date,
        }
    }
}

/// Parse a raw `<OAI-PMH>` document body into a [`ResponseEnvelope`].
///
/// `url` is carried only for error messages.
pub fn parse(url: &str, body: &str) -> Result<ResponseEnvelope, TransportError> {
    let malformed = |reason: String| TransportError::MalformedXml {
        url: url.to_string(),
        reason,
    };

    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut response_date = String::new();
    let mut error_code: Option<String> = None;
    let mut error_text = String::new();
    let mut granularity: Option<String> = None;
    let mut saw_identify = false;
    let mut saw_list_records = false;
    let mut resumption_token: Option<String> = None;
    let mut records: Vec<RawRecord> = Vec::new();

    // Path of currently-open element local names, used to disambiguate
    // nested same-named elements (e.g. `error` never nests, but this keeps
    // the walk honest as the schema grows).
    let mut path: Vec<String> = Vec::new();
    let mut text_buf = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|err| malformed(err.to_string()))?;

        match event {
            Event::Eof => break,
            Event::Start(start) => {
                let name = local_name(&start);
                match name.as_str() {
                    "Identify" => saw_identify = true,
                    "ListRecords" => saw_list_records = true,
                    "error" => {
                        error_code = start
                            .attributes()
                            .filter_map(|attr| attr.ok())
                            .find(|attr| attr.key.as_ref() == b"code")
                            .map(|attr| {
                                String::from_utf8_lossy(attr.value.as_ref()).into_owned()
                            });
                    }
                    "record" => {
                        if let Some(record) = parse_record(&mut reader)
                            .map_err(|err| malformed(err.to_string()))?
                        {
                            records.push(record);
                        }
                        // parse_record consumes through </record>; don't push
                        // "record" onto path since it's already closed.
                        text_buf.clear();
                        continue;
                    }
                    _ => {}
                }
                path.push(name);
                text_buf.clear();
            }
            Event::Empty(start) => {
                let name = local_name(&start);
                if name == "error" {
                    error_code = start
                        .attributes()
                        .filter_map(|attr| attr.ok())
                        .find(|attr| attr.key.as_ref() == b"code")
                        .map(|attr| String::from_utf8_lossy(attr.value.as_ref()).into_owned());
                    error_text.clear();
                }
            }
            Event::End(end) => {
                let name = local_name_bytes(end.name().as_ref());
                if let Some(top) = path.last()
                    && *top == name
                {
                    match name.as_str() {
                        "responseDate" => response_date = text_buf.trim().to_string(),
                        "granularity" => granularity = Some(text_buf.trim().to_string()),
                        "resumptionToken" => {
                            let token = text_buf.trim();
                            resumption_token = if token.is_empty() {
                                None
                            } else {
                                Some(token.to_string())
                            };
                        }
                        "error" => error_text = text_buf.trim().to_string(),
                        _ => {}
                    }
                    path.pop();
                }
                text_buf.clear();
            }
            Event::Text(text) => {
                text_buf.push_str(
                    &text
                        .unescape()
                        .map_err(|err| malformed(err.to_string()))?,
                );
            }
            _ => {}
        }
    }

    if response_date.is_empty() {
        return Err(malformed("missing responseDate".to_string()));
    }

    if let Some(code) = error_code {
        return Ok(ResponseEnvelope::Error {
            response_date,
            code,
            text: error_text,
        });
    }

    if saw_list_records {
        return Ok(ResponseEnvelope::ListRecords {
            response_date,
            records,
            resumption_token,
        });
    }

    if saw_identify {
        return Ok(ResponseEnvelope::Identify {
            response_date,
            granularity,
        });
    }

    Err(malformed(
        "response contained none of Identify, ListRecords, or error".to_string(),
    ))
}

/// Consume one `<record>...</record>` element, capturing its header fields
/// and the full element as raw text for the writer to interpret.
fn parse_record(reader: &mut Reader<&[u8]>) -> quick_xml::Result<Option<RawRecord>> {
    let mut identifier = String::new();
    let mut datestamp = String::new();
    let mut status: Option<String> = None;
    let mut xml = String::from("<record>");
    let mut path: Vec<String> = Vec::new();
    let mut text_buf = String::new();
    let mut depth = 1usize;

    loop {
        let event = reader.read_event()?;
        match &event {
            Event::Eof => return Ok(None),
            Event::Start(start) => {
                let name = local_name(start);
                if name == "header" {
                    status = start
                        .attributes()
                        .filter_map(|attr| attr.ok())
                        .find(|attr| attr.key.as_ref() == b"status")
                        .map(|attr| String::from_utf8_lossy(attr.value.as_ref()).into_owned());
                }
                depth += 1;
                path.push(name);
                text_buf.clear();
            }
            Event::Empty(_) => {}
            Event::End(end) => {
                let name = local_name_bytes(end.name().as_ref());
                if name == "record" && depth == 1 {
                    xml.push_str("</record>");
                    return Ok(Some(RawRecord {
                        header: RecordHeader {
                            identifier,
                            datestamp,
                            status,
                        },
                        xml,
                    }));
                }
                if let Some(top) = path.last()
                    && *top == name
                {
                    match name.as_str() {
                        "identifier" => identifier = text_buf.trim().to_string(),
                        "datestamp" => datestamp = text_buf.trim().to_string(),
                        _ => {}
                    }
                    path.pop();
                }
                depth -= 1;
                text_buf.clear();
            }
            Event::Text(text) => {
                text_buf.push_str(&text.unescape()?);
            }
            _ => {}
        }
        xml.push_str(&raw_event_text(&event));
    }
}

/// Best-effort re-serialization of an event back to text, for carrying the
/// record's metadata/about subtree through to the writer untouched.
fn raw_event_text(event: &Event) -> String {
    match event {
        Event::Start(start) => format!("<{}>", String::from_utf8_lossy(start.as_ref())),
        Event::End(end) => format!("</{}>", String::from_utf8_lossy(end.name().as_ref())),
        Event::Empty(start) => format!("<{}/>", String::from_utf8_lossy(start.as_ref())),
        Event::Text(text) => String::from_utf8_lossy(text.as_ref()).into_owned(),
        Event::CData(cdata) => String::from_utf8_lossy(cdata.as_ref()).into_owned(),
        _ => String::new(),
    }
}

fn local_name(start: &quick_xml::events::BytesStart) -> String {
    local_name_bytes(start.name().as_ref())
}

fn local_name_bytes(qname: &[u8]) -> String {
    let name = String::from_utf8_lossy(qname);
    match name.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => name.into_owned(),
    }
}
