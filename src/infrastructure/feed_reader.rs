//! Streaming supplier feed reader
//!
//! Pulls one record element at a time out of the XML document with a
//! constant-size buffer. There is no byte-level seek: resuming at ordinal N
//! re-scans the document from the start and discards the first N record
//! boundaries.

use quick_xml::events::Event;
use quick_xml::name::QName;
use quick_xml::Reader;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

use crate::domain::errors::FeedError;
use crate::domain::feed_record::{FeedRecord, parse_price};
use crate::infrastructure::config::FeedSchema;

/// Lazy, forward-only iterator over the records of one feed file
pub struct FeedReader {
    reader: Reader<BufReader<File>>,
    schema: FeedSchema,
    buf: Vec<u8>,
    skip_buf: Vec<u8>,
    next_ordinal: u64,
    finished: bool,
}

/// Which child field of a record is being read
#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Id,
    Price,
    Quantity,
    Other,
}

impl FeedReader {
    pub fn open(path: impl AsRef<Path>, schema: FeedSchema) -> Result<Self, FeedError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| FeedError::open(path, e))?;
        let mut reader = Reader::from_reader(BufReader::new(file));
        reader.config_mut().trim_text(true);

        debug!("Opened feed {:?}", path);
        Ok(Self {
            reader,
            schema,
            buf: Vec::with_capacity(1024),
            skip_buf: Vec::with_capacity(1024),
            next_ordinal: 0,
            finished: false,
        })
    }

    /// Ordinal of the next record this reader will yield
    pub const fn position(&self) -> u64 {
        self.next_ordinal
    }

    /// Discard up to `count` records; returns how many were actually skipped
    pub fn skip_records(&mut self, count: u64) -> Result<u64, FeedError> {
        let mut skipped = 0;
        while skipped < count {
            match self.next_boundary()? {
                None => break,
                Some(Boundary::Empty) => {}
                Some(Boundary::Open(name)) => {
                    self.skip_buf.clear();
                    let reader = &mut self.reader;
                    reader
                        .read_to_end_into(QName(&name), &mut self.skip_buf)
                        .map_err(|e| FeedError::malformed(byte_position(reader), e.to_string()))?;
                }
            }
            self.next_ordinal += 1;
            skipped += 1;
        }
        Ok(skipped)
    }

    /// Advance to the next record element in document order
    fn next_boundary(&mut self) -> Result<Option<Boundary>, FeedError> {
        loop {
            match read_event(&mut self.reader, &mut self.buf)? {
                Event::Start(e) if e.local_name().as_ref() == self.schema.record_element.as_bytes() => {
                    return Ok(Some(Boundary::Open(e.name().as_ref().to_vec())));
                }
                Event::Empty(e) if e.local_name().as_ref() == self.schema.record_element.as_bytes() => {
                    return Ok(Some(Boundary::Empty));
                }
                Event::Eof => return Ok(None),
                _ => {}
            }
        }
    }

    /// Read the body of an open record element up to its closing tag
    fn read_record_body(&mut self, ordinal: u64) -> Result<FeedRecord, FeedError> {
        let mut external_id = String::new();
        let mut price_text = String::new();
        let mut quantity_text = String::new();
        let mut depth = 0usize;
        let mut current = Field::Other;

        loop {
            let text = match read_event(&mut self.reader, &mut self.buf)? {
                Event::Start(e) => {
                    if depth == 0 {
                        current = classify(&self.schema, e.local_name().as_ref());
                    }
                    depth += 1;
                    continue;
                }
                Event::End(_) => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                    if depth == 0 {
                        current = Field::Other;
                    }
                    continue;
                }
                Event::Text(t) if depth == 1 => t
                    .unescape()
                    .map_err(|e| FeedError::malformed(byte_position(&self.reader), e.to_string()))?
                    .into_owned(),
                Event::CData(c) if depth == 1 => String::from_utf8_lossy(&c.into_inner()).into_owned(),
                Event::Eof => {
                    return Err(FeedError::malformed(
                        byte_position(&self.reader),
                        format!("feed ended inside record {ordinal}"),
                    ));
                }
                _ => continue,
            };

            match current {
                Field::Id => external_id.push_str(&text),
                Field::Price => price_text.push_str(&text),
                Field::Quantity => quantity_text.push_str(&text),
                Field::Other => {}
            }
        }

        let record = FeedRecord::new(ordinal, external_id.trim(), parse_price(&price_text));
        Ok(match quantity_text.trim().parse::<i64>() {
            Ok(q) => record.with_quantity(q),
            Err(_) => record,
        })
    }
}

fn read_event<'b>(
    reader: &mut Reader<BufReader<File>>,
    buf: &'b mut Vec<u8>,
) -> Result<Event<'b>, FeedError> {
    buf.clear();
    reader
        .read_event_into(buf)
        .map_err(|e| FeedError::malformed(byte_position(reader), e.to_string()))
}

fn byte_position(reader: &Reader<BufReader<File>>) -> u64 {
    u64::try_from(reader.buffer_position()).unwrap_or_default()
}

fn classify(schema: &FeedSchema, local_name: &[u8]) -> Field {
    if local_name == schema.id_field.as_bytes() {
        Field::Id
    } else if local_name == schema.price_field.as_bytes() {
        Field::Price
    } else if local_name == schema.quantity_field.as_bytes() {
        Field::Quantity
    } else {
        Field::Other
    }
}

enum Boundary {
    /// Opening tag; the qualified name is needed to find its end
    Open(Vec<u8>),
    /// Self-closing record with no fields
    Empty,
}

impl Iterator for FeedReader {
    type Item = Result<FeedRecord, FeedError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let ordinal = self.next_ordinal;
        let result = match self.next_boundary() {
            Ok(None) => {
                self.finished = true;
                return None;
            }
            Ok(Some(Boundary::Empty)) => Ok(FeedRecord::new(ordinal, "", None)),
            Ok(Some(Boundary::Open(_))) => self.read_record_body(ordinal),
            Err(e) => Err(e),
        };

        match &result {
            Ok(_) => self.next_ordinal += 1,
            Err(_) => self.finished = true,
        }
        Some(result)
    }
}

/// Dedicated counting pass over a feed, used by the validator
pub fn count_records(path: impl AsRef<Path>, schema: &FeedSchema) -> Result<u64, FeedError> {
    let mut reader = FeedReader::open(path, schema.clone())?;
    reader.skip_records(u64::MAX)
}
