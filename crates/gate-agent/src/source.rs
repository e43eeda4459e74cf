//! Line-oriented credential intake.
//!
//! Each line is one delivery. `tag <hex-uid>` is a proximity read,
//! anything else is the payload of a short-range write.

use gate_core::errors::EngineError;
use gate_core::{Credential, CredentialSource, Delivery, EngineHandle};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

const TAG_PREFIX: &str = "tag";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntakeError {
    #[error("invalid tag uid: {0}")]
    BadTagUid(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Intake {
    Write(Vec<u8>),
    Tag(Vec<u8>),
}

impl Intake {
    pub fn parse(line: &str) -> Result<Self, IntakeError> {
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        let mut words = line.trim_start().splitn(2, char::is_whitespace);
        if words.next() == Some(TAG_PREFIX) {
            let uid = words.next().unwrap_or("").trim();
            if uid.is_empty() {
                return Err(IntakeError::BadTagUid("missing".to_string()));
            }
            return hex::decode(uid)
                .map(Intake::Tag)
                .map_err(|e| IntakeError::BadTagUid(e.to_string()));
        }
        Ok(Intake::Write(line.as_bytes().to_vec()))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub accepted: u32,
    pub ignored: u32,
    pub dropped: u32,
    pub rejected: u32,
}

pub struct LineSource<R> {
    reader: R,
    handle: EngineHandle,
}

impl<R: AsyncBufRead + Unpin> LineSource<R> {
    pub fn new(reader: R, handle: EngineHandle) -> Self {
        Self { reader, handle }
    }

    /// Feed lines to the engine until input ends or the engine stops.
    pub async fn run(self) -> std::io::Result<SourceStats> {
        let mut stats = SourceStats::default();
        let mut lines = self.reader.lines();

        while let Some(line) = lines.next_line().await? {
            let delivered = match Intake::parse(&line) {
                Ok(Intake::Write(raw)) => self.handle.deliver(&raw, CredentialSource::ShortRange),
                Ok(Intake::Tag(uid)) => match Credential::from_tag_uid(&uid) {
                    Some(credential) => self.handle.deliver_credential(credential),
                    None => Ok(Delivery::IgnoredEmpty),
                },
                Err(e) => {
                    warn!(error = %e, "rejecting input line");
                    stats.rejected += 1;
                    continue;
                }
            };

            match delivered {
                Ok(Delivery::Accepted) => stats.accepted += 1,
                Ok(Delivery::IgnoredEmpty) => {
                    debug!("empty credential ignored");
                    stats.ignored += 1;
                }
                Ok(Delivery::DroppedBusy) => {
                    info!("credential dropped, verification in progress");
                    stats.dropped += 1;
                }
                Err(EngineError::Stopped) => {
                    info!("engine stopped, closing input");
                    break;
                }
            }
        }

        debug!(?stats, "input closed");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gate_core::harness::GateHarness;
    use gate_core::EngineState;
    use gate_transport::{FakeRadio, ScriptedBackend};
    use proptest::prelude::*;

    #[test]
    fn parses_writes_and_tags() {
        assert_eq!(Intake::parse("HELLO\r\n").unwrap(), Intake::Write(b"HELLO".to_vec()));
        assert_eq!(
            Intake::parse("tag 04A1b2").unwrap(),
            Intake::Tag(vec![0x04, 0xa1, 0xb2])
        );
        assert_eq!(Intake::parse("tagged").unwrap(), Intake::Write(b"tagged".to_vec()));
        assert_eq!(Intake::parse("").unwrap(), Intake::Write(Vec::new()));
    }

    #[test]
    fn rejects_bad_tag_uid() {
        assert!(matches!(Intake::parse("tag"), Err(IntakeError::BadTagUid(_))));
        assert!(matches!(Intake::parse("tag xyz"), Err(IntakeError::BadTagUid(_))));
        assert!(matches!(Intake::parse("tag 0"), Err(IntakeError::BadTagUid(_))));
    }

    #[tokio::test]
    async fn one_accepted_while_engine_is_busy() {
        let harness = GateHarness::new(FakeRadio::connecting(), ScriptedBackend::deciding("ALLOW"));
        let input: &[u8] = b"\n   \nHELLO\nSECOND\ntag zz\n";

        let stats = LineSource::new(input, harness.engine.handle()).run().await.unwrap();

        assert_eq!(
            stats,
            SourceStats {
                accepted: 1,
                ignored: 2,
                dropped: 1,
                rejected: 1,
            }
        );
        assert_eq!(harness.engine.state(), EngineState::Verifying);
    }

    #[tokio::test(start_paused = true)]
    async fn tag_read_is_delivered_as_hex() {
        let mut harness = GateHarness::new(FakeRadio::connecting(), ScriptedBackend::deciding("ALLOW"));
        let input: &[u8] = b"tag 04A1B2C3\n";

        let stats = LineSource::new(input, harness.engine.handle()).run().await.unwrap();
        assert_eq!(stats.accepted, 1);

        harness.engine.process_next().await.unwrap();
        let requests = harness.backend.requests();
        assert_eq!(requests.len(), 1);
        assert!(String::from_utf8_lossy(&requests[0].body).contains("04a1b2c3"));
    }

    proptest! {
        #[test]
        fn untagged_lines_are_writes(line in "[^\r\n]{0,40}") {
            prop_assume!(line.trim_start().split_whitespace().next() != Some(TAG_PREFIX));
            prop_assert_eq!(Intake::parse(&line).unwrap(), Intake::Write(line.as_bytes().to_vec()));
        }

        #[test]
        fn tag_uids_decode(uid in proptest::collection::vec(any::<u8>(), 1..10)) {
            let line = format!("tag {}", hex::encode_upper(&uid));
            prop_assert_eq!(Intake::parse(&line).unwrap(), Intake::Tag(uid));
        }
    }
}
