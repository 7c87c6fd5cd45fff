// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! Envelope headers carried by the Verify and Env PDUs

use std::mem;

use crate::mep2::error::Mep2Error;
use crate::mep2::{strip_pdu_crlf, text};
use crate::util;

pub use self::address::RawAddress;
pub use self::date::Date;

pub mod address;
pub mod date;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    #[default]
    None,
    Postal,
    Onite,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Target {
    #[default]
    Idle,
    To,
    Cc,
    From,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum HeaderField {
    From,
    To,
    Cc,
    Date,
    SourceDate,
    MessageId,
    SourceMessageId,
    Subject,
    Handling,
    Custom,
    AddressCont,
}

const SUBJECT_LIMIT: usize = 255;
const MESSAGE_ID_LIMIT: usize = 100;
const SOURCE_ID_LIMIT: usize = 78;
const CUSTOM_TAG_LIMIT: usize = 20;

/// How many Source-Message-Id and U- entries we keep. Oldest fall out first.
const FIFO_WINDOW: usize = 5;

/// Accumulator for the envelope section of a message.
///
/// `Verify` uses the same grammar restricted to addressing fields
/// (`address_only`); `Env` accepts the full set.
#[derive(Debug, Default)]
pub struct Envelope {
    address_only: bool,
    priority: Priority,
    saw_data: bool,
    target: Target,
    current: RawAddress,

    pub from: Option<RawAddress>,
    pub to: Vec<RawAddress>,
    pub cc: Vec<RawAddress>,
    pub date: Option<Date>,
    pub source_date: Option<Date>,
    pub subject: Option<String>,
    pub message_id: Option<String>,
    pub source_message_ids: Vec<String>,
    pub u_fields: Vec<(String, String)>,
}

impl Envelope {
    pub fn new(address_only: bool) -> Envelope {
        Envelope { address_only, ..Envelope::default() }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Start-line options: an optional priority keyword.
    pub fn parse_options(&mut self, options: &[u8]) -> Result<(), Mep2Error> {
        match options {
            // No priority requested is fine
            b"" => Ok(()),
            b"POSTAL" => {
                self.priority = Priority::Postal;
                Ok(())
            }
            b"ONITE" => {
                self.priority = Priority::Onite;
                Ok(())
            }
            _ => Err(Mep2Error::malformed("Unknown priority")),
        }
    }

    pub fn parse_line(&mut self, line: &[u8]) -> Result<(), Mep2Error> {
        if line.is_empty() {
            return Err(Mep2Error::malformed("Empty address line"));
        }

        let line = strip_pdu_crlf(line)?;

        if line.is_empty() {
            return Err(Mep2Error::malformed("Empty envelope line"));
        }

        let colon = match line.iter().position(|&c| c == b':') {
            Some(colon) => colon,
            None => return Err(Mep2Error::malformed("Missing : in envelope line")),
        };

        // The field keeps its leading whitespace for now: a continuation line
        // is recognised by it
        let mut field = &line[..colon + 1];
        let information = util::strip(&line[colon + 1..]);

        let kind = if util::starts_with_ignore_case(line, b"from:") {
            HeaderField::From
        } else if util::starts_with_ignore_case(line, b"to:") {
            HeaderField::To
        } else if util::starts_with_ignore_case(line, b"cc:") {
            HeaderField::Cc
        } else if util::starts_with_ignore_case(line, b"date:") {
            HeaderField::Date
        } else if util::starts_with_ignore_case(line, b"source-date:") {
            HeaderField::SourceDate
        } else if util::starts_with_ignore_case(line, b"message-id:") {
            HeaderField::MessageId
        } else if util::starts_with_ignore_case(line, b"source-message-id:") {
            HeaderField::SourceMessageId
        } else if util::starts_with_ignore_case(line, b"subject:") {
            HeaderField::Subject
        } else if util::starts_with_ignore_case(line, b"handling:") {
            HeaderField::Handling
        } else if util::starts_with_ignore_case(line, b"u-") {
            HeaderField::Custom
        } else if util::is_wsp(line[0]) {
            field = util::lstrip(field);
            HeaderField::AddressCont
        } else {
            return Err(Mep2Error::malformed("Invalid header type"));
        };

        let information = text::decode(information)
            .map_err(|err| Mep2Error::MalformedData(err.to_string()))?;

        if self.address_only {
            match kind {
                HeaderField::AddressCont | HeaderField::To | HeaderField::Cc => {}
                _ => return Err(Mep2Error::malformed("Invalid addressing type")),
            }
        }

        // Anything but a continuation closes the address being accumulated
        if kind != HeaderField::AddressCont {
            self.finish_current_address();
        }

        match kind {
            HeaderField::AddressCont => {
                if self.target == Target::Idle {
                    return Err(Mep2Error::malformed("Invalid start of address"));
                }

                if !util::is_printable(&information) {
                    return Err(Mep2Error::malformed("Invalid characters in address"));
                }

                let field = String::from_utf8_lossy(field);
                self.current.parse_field(&field, &information)?;
            }

            HeaderField::To | HeaderField::Cc | HeaderField::From => {
                self.target = match kind {
                    HeaderField::To => Target::To,
                    HeaderField::Cc => Target::Cc,
                    _ => {
                        if self.from.is_some() {
                            return Err(Mep2Error::EnvelopeProblem(
                                "Multiple FROM: addresses".into(),
                            ));
                        }
                        Target::From
                    }
                };

                if !util::is_printable(&information) {
                    return Err(Mep2Error::malformed("Invalid characters in address"));
                }

                self.current.parse_first_line(&information)?;
            }

            HeaderField::Date => self.date = Some(parse_date(&information)?),
            HeaderField::SourceDate => self.source_date = Some(parse_date(&information)?),

            HeaderField::Subject => self.subject = Some(truncated(information, SUBJECT_LIMIT)),
            HeaderField::MessageId => {
                self.message_id = Some(truncated(information, MESSAGE_ID_LIMIT));
            }

            HeaderField::SourceMessageId => {
                if self.source_message_ids.len() == FIFO_WINDOW {
                    self.source_message_ids.remove(0);
                }
                self.source_message_ids.push(truncated(information, SOURCE_ID_LIMIT));
            }

            HeaderField::Custom => {
                if self.u_fields.len() == FIFO_WINDOW {
                    self.u_fields.remove(0);
                }

                // Drop the ":" from the tag
                let tag = String::from_utf8_lossy(&field[..field.len() - 1]).into_owned();
                self.u_fields
                    .push((truncated(tag, CUSTOM_TAG_LIMIT), truncated(information, SOURCE_ID_LIMIT)));
            }

            HeaderField::Handling => {}
        }

        // We saw *something* valid
        self.saw_data = true;

        Ok(())
    }

    fn finish_current_address(&mut self) {
        let address = mem::take(&mut self.current);

        match self.target {
            Target::Idle => return,
            Target::To => self.to.push(address),
            Target::Cc => self.cc.push(address),
            Target::From => self.from = Some(address),
        }

        self.target = Target::Idle;
    }

    /// Semantic check once the end line has validated.
    pub fn finalize(&mut self) -> Result<(), Mep2Error> {
        self.finish_current_address();

        if !self.saw_data {
            return Err(Mep2Error::NoEnvelopeData);
        }

        if self.to.is_empty() {
            return Err(Mep2Error::ToRequired);
        }

        Ok(())
    }
}

fn parse_date(information: &str) -> Result<Date, Mep2Error> {
    Date::parse(information).map_err(|err| Mep2Error::MalformedData(err.to_string()))
}

fn truncated(mut value: String, limit: usize) -> String {
    value.truncate(limit);
    value
}
