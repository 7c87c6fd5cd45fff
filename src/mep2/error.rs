// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! The MEP2 reply-code taxonomy

use thiserror::Error;

/// Reply code acknowledging a successfully processed PDU.
pub const SUCCESS: u16 = 100;

#[derive(Debug, Error)]
pub enum Mep2Error {
    #[error("Unable to perform: {0}")]
    UnableToPerform(String),
    #[error("PDU syntax error: {0}")]
    Syntax(String),
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("Malformed data: {0}")]
    MalformedData(String),
    #[error("Unimplemented function: {0}")]
    Unimplemented(String),
    #[error("At least one problem within envelope: {0}")]
    EnvelopeProblem(String),
    #[error("No envelope data received")]
    NoEnvelopeData,
    #[error("At least one To: recipient required")]
    ToRequired,
    #[error("Master must terminate, permanent")]
    MasterMustTermPermanent,
    #[error("System error: {0}")]
    System(String),
    #[error("Insufficient space")]
    InsufficientSpace,
    #[error("Checksum error: {0}")]
    Checksum(String),
    #[error("System unavailable")]
    SystemUnavailable,
    #[error("Account in use")]
    AccountInUse,
    #[error("Connections busy")]
    ConnectionsBusy,
    #[error("Timeout")]
    Timeout,
    #[error("Too many checksum errors")]
    TooManyChecksumErrors,
    #[error("Master must terminate, temporary")]
    MasterMustTermTemporary,
}

impl Mep2Error {
    pub fn syntax(context: impl Into<String>) -> Self {
        Mep2Error::Syntax(context.into())
    }

    pub fn malformed(context: impl Into<String>) -> Self {
        Mep2Error::MalformedData(context.into())
    }

    /// The integer status carried by the reply PDU for this error.
    pub fn code(&self) -> u16 {
        match self {
            Mep2Error::UnableToPerform(_) => 300,
            Mep2Error::Syntax(_) => 301,
            Mep2Error::ProtocolViolation(_) => 302,
            Mep2Error::MalformedData(_) => 303,
            Mep2Error::Unimplemented(_) => 304,
            Mep2Error::EnvelopeProblem(_) => 310,
            Mep2Error::NoEnvelopeData => 311,
            Mep2Error::ToRequired => 312,
            Mep2Error::MasterMustTermPermanent => 399,
            Mep2Error::System(_) => 400,
            Mep2Error::InsufficientSpace => 401,
            Mep2Error::Checksum(_) => 403,
            Mep2Error::SystemUnavailable => 404,
            Mep2Error::AccountInUse => 407,
            Mep2Error::ConnectionsBusy => 408,
            Mep2Error::Timeout => 409,
            Mep2Error::TooManyChecksumErrors => 498,
            Mep2Error::MasterMustTermTemporary => 499,
        }
    }

    /// Errors after which the session must drop the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self.code(), 399 | 498 | 499)
    }
}
