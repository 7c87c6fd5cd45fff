// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! Server-side implementation of MEP2, the line-oriented mail protocol of
//! the MCI Mail service: a streaming PDU parser with full structural,
//! lexical, semantic and integrity validation, plus the mail store the
//! session feeds.

pub mod config;
pub mod envelope;
pub mod mep2;
pub mod store;

mod util;
