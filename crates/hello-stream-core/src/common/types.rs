//! # Record and Acknowledgement value types
//!
//! The protobuf messages ([`Person`], [`Ack`]) are the wire representation.
//! Application code works with [`Record`] and [`Acknowledgement`] instead:
//! immutable values that convert to and from the wire types at the edges.
//!
//! ## Constants
//!
//! - [`BATCH_SIZE`] - Records pushed per `send_batch` call
//! - [`RESET_EVERY`] - Batches between connection resets
//! - [`DEFAULT_PORT`] - Port the server listens on by default

use crate::proto::{Ack, Person};
use core::fmt;

/// Number of records produced by a single batch.
pub const BATCH_SIZE: usize = 10;

/// The session tears down and rebuilds its connection after every
/// `RESET_EVERY` completed batches.
pub const RESET_EVERY: u64 = 3;

/// Default port of the streaming server.
pub const DEFAULT_PORT: u16 = 6565;

/// A single person sent from client to server.
///
/// Equality is field equality; there is no identity beyond that.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Record {
    first_name: String,
    last_name: String,
}

impl Record {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }

    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    /// Produces the [`BATCH_SIZE`] records of one batch, in push order.
    ///
    /// Every record keeps `first_name` unchanged; the `i`-th record's last
    /// name is `"<last_name>:<i>"`. Empty strings are valid input.
    pub fn batch<'a>(first_name: &'a str, last_name: &'a str) -> impl Iterator<Item = Self> + 'a {
        (0..BATCH_SIZE).map(move |i| Self::new(first_name, format!("{last_name}:{i}")))
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.first_name, self.last_name)
    }
}

impl From<Record> for Person {
    fn from(record: Record) -> Self {
        Self {
            first_name: record.first_name,
            last_name: record.last_name,
        }
    }
}

impl From<Person> for Record {
    fn from(person: Person) -> Self {
        Self {
            first_name: person.first_name,
            last_name: person.last_name,
        }
    }
}

/// Empty confirmation sent by the server once per stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Acknowledgement;

impl From<Ack> for Acknowledgement {
    fn from(_: Ack) -> Self {
        Self
    }
}

impl From<Acknowledgement> for Ack {
    fn from(_: Acknowledgement) -> Self {
        Self {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_suffixes_last_name_in_order() {
        let records: Vec<_> = Record::batch("Ann", "Lee").collect();

        assert_eq!(records.len(), BATCH_SIZE);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.first_name(), "Ann");
            assert_eq!(record.last_name(), format!("Lee:{i}"));
        }
        assert_eq!(records.first().map(Record::last_name), Some("Lee:0"));
        assert_eq!(records.last().map(Record::last_name), Some("Lee:9"));
    }

    #[test]
    fn batch_accepts_empty_names() {
        let records: Vec<_> = Record::batch("", "").collect();
        assert_eq!(records[0], Record::new("", ":0"));
        assert_eq!(records[9], Record::new("", ":9"));
    }

    #[test]
    fn record_survives_the_wire_type() {
        let record = Record::new("Billy", "Bob:3");
        let person = Person::from(record.clone());
        assert_eq!(person.first_name, "Billy");
        assert_eq!(person.last_name, "Bob:3");
        assert_eq!(Record::from(person), record);
        assert_eq!(record.to_string(), "Billy Bob:3");
    }

    #[test]
    fn acknowledgement_is_empty() {
        assert_eq!(Acknowledgement::from(Ack {}), Acknowledgement);
        assert_eq!(Ack::from(Acknowledgement), Ack {});
    }
}
