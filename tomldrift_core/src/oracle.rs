use crate::adapter::{AdapterError, DecodeOutcome, DecoderAdapter};
use crate::compare::compare;
use crate::config::CompareMode;
use crate::value::CanonicalValue;
use std::fmt;
use thiserror::Error;

/// Fatal per-round failures. Any of these aborts the whole run: they mean
/// the harness or an adapter is broken, never that a decoder divergence was
/// found.
#[derive(Error, Debug)]
pub enum RoundError {
    /// The harness could not invoke or communicate with a decoder.
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// A decoder claimed success but its payload could not be parsed in the
    /// active comparison mode. An adapter-contract violation rather than a
    /// finding: the payload format is part of the invocation protocol, not
    /// of the decoder's TOML handling.
    #[error("decoder {adapter} claimed success but emitted an unparseable payload: {detail}")]
    MalformedOutput { adapter: String, detail: String },
}

/// A divergence finding: the triggering input, both decoders' outcomes, and
/// which comparison rule failed.
#[derive(Debug)]
pub struct DivergenceReport {
    pub input: Vec<u8>,
    pub adapter_a: String,
    pub adapter_b: String,
    pub outcome_a: DecodeOutcome,
    pub outcome_b: DecodeOutcome,
    /// The failed rule: an accept/reject mismatch, or a localized value
    /// mismatch rendered from the comparator.
    pub failure: String,
    /// md5 of the input, for deduplication and tracking.
    pub input_hash: String,
}

impl fmt::Display for DivergenceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "divergence on input {:?} (md5 {}):",
            String::from_utf8_lossy(&self.input),
            self.input_hash
        )?;
        write_outcome(f, &self.adapter_a, &self.outcome_a)?;
        write_outcome(f, &self.adapter_b, &self.outcome_b)?;
        write!(f, "  failure: {}", self.failure)
    }
}

fn write_outcome(f: &mut fmt::Formatter<'_>, name: &str, outcome: &DecodeOutcome) -> fmt::Result {
    match outcome {
        DecodeOutcome::Rejected => writeln!(f, "  decoder {name}: rejected the input"),
        DecodeOutcome::Decoded(payload) => {
            writeln!(f, "  decoder {name}: decoded to:")?;
            for line in payload.lines() {
                writeln!(f, "    {line}")?;
            }
            Ok(())
        }
    }
}

/// Verdict of one comparison round.
#[derive(Debug)]
pub enum RoundVerdict {
    /// Both decoders accepted and the values compare equal.
    Agreement,
    /// Both decoders rejected the input: no signal, no artifact.
    Uninteresting,
    /// An error mismatch was suppressed by the known-bug byte allowlist.
    /// Distinct from `Agreement` so suppressed cases stay visible.
    Skipped { reason: String },
    /// The decoders disagree, either on accept/reject or on the value.
    Divergence(Box<DivergenceReport>),
}

/// The comparison core: holds the two decoder bindings (read-only after
/// construction, shareable across worker threads) and classifies one input
/// per [`DivergenceOracle::run_round`] call.
pub struct DivergenceOracle {
    adapter_a: Box<dyn DecoderAdapter>,
    adapter_b: Box<dyn DecoderAdapter>,
    mode: CompareMode,
    suppress_bytes: Vec<u8>,
}

impl DivergenceOracle {
    pub fn new(
        adapter_a: Box<dyn DecoderAdapter>,
        adapter_b: Box<dyn DecoderAdapter>,
        mode: CompareMode,
        suppress_bytes: Vec<u8>,
    ) -> Self {
        Self {
            adapter_a,
            adapter_b,
            mode,
            suppress_bytes,
        }
    }

    /// Runs one round: invoke both adapters on the identical input, then
    /// classify. Adapter-level failures propagate as `Err` and abort the
    /// run; decoder-level outcomes always produce a verdict.
    pub fn run_round(&self, input: &[u8]) -> Result<RoundVerdict, RoundError> {
        // Both adapters complete before any classification, so a fatal
        // error on one side never leaves the other binding uninvoked.
        let result_a = self.adapter_a.decode(input);
        let result_b = self.adapter_b.decode(input);
        let outcome_a = result_a?;
        let outcome_b = result_b?;

        match (&outcome_a, &outcome_b) {
            (DecodeOutcome::Rejected, DecodeOutcome::Rejected) => Ok(RoundVerdict::Uninteresting),
            (DecodeOutcome::Decoded(payload_a), DecodeOutcome::Decoded(payload_b)) => {
                let value_a = self.parse_payload(self.adapter_a.name(), payload_a)?;
                let value_b = self.parse_payload(self.adapter_b.name(), payload_b)?;
                match compare(&value_a, &value_b) {
                    Ok(()) => Ok(RoundVerdict::Agreement),
                    Err(mismatch) => Ok(RoundVerdict::Divergence(Box::new(
                        self.report(input, outcome_a, outcome_b, mismatch.to_string()),
                    ))),
                }
            }
            _ => {
                if let Some(byte) = input
                    .iter()
                    .copied()
                    .find(|byte| self.suppress_bytes.contains(byte))
                {
                    return Ok(RoundVerdict::Skipped {
                        reason: format!(
                            "accept/reject mismatch suppressed: input contains allowlisted byte 0x{byte:02x}"
                        ),
                    });
                }
                let failure = format!(
                    "decoders disagree on validity: {} {} the input, {} {} it",
                    self.adapter_a.name(),
                    describe(&outcome_a),
                    self.adapter_b.name(),
                    describe(&outcome_b),
                );
                Ok(RoundVerdict::Divergence(Box::new(self.report(
                    input, outcome_a, outcome_b, failure,
                ))))
            }
        }
    }

    fn parse_payload(&self, adapter: &str, payload: &str) -> Result<CanonicalValue, RoundError> {
        let malformed = |detail: String| RoundError::MalformedOutput {
            adapter: adapter.to_string(),
            detail,
        };
        match self.mode {
            CompareMode::Structured => {
                let json: serde_json::Value =
                    serde_json::from_str(payload).map_err(|e| malformed(e.to_string()))?;
                CanonicalValue::from_tagged_json(&json).map_err(|e| malformed(e.to_string()))
            }
            CompareMode::Roundtrip => {
                let doc: toml::Value =
                    toml::from_str(payload).map_err(|e| malformed(e.to_string()))?;
                Ok(CanonicalValue::from_toml(&doc))
            }
        }
    }

    fn report(
        &self,
        input: &[u8],
        outcome_a: DecodeOutcome,
        outcome_b: DecodeOutcome,
        failure: String,
    ) -> DivergenceReport {
        DivergenceReport {
            input: input.to_vec(),
            adapter_a: self.adapter_a.name().to_string(),
            adapter_b: self.adapter_b.name().to_string(),
            outcome_a,
            outcome_b,
            failure,
            input_hash: format!("{:x}", md5::compute(input)),
        }
    }
}

fn describe(outcome: &DecodeOutcome) -> &'static str {
    match outcome {
        DecodeOutcome::Decoded(_) => "accepted",
        DecodeOutcome::Rejected => "rejected",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted stand-in for an external decoder process.
    enum FakeBehavior {
        Decode(&'static str),
        Reject,
        Fail,
    }

    struct FakeAdapter {
        name: &'static str,
        behavior: FakeBehavior,
    }

    impl DecoderAdapter for FakeAdapter {
        fn name(&self) -> &str {
            self.name
        }

        fn decode(&self, _input: &[u8]) -> Result<DecodeOutcome, AdapterError> {
            match &self.behavior {
                FakeBehavior::Decode(payload) => Ok(DecodeOutcome::Decoded(payload.to_string())),
                FakeBehavior::Reject => Ok(DecodeOutcome::Rejected),
                FakeBehavior::Fail => Err(AdapterError::Io {
                    name: self.name.to_string(),
                    detail: "scripted adapter failure".to_string(),
                }),
            }
        }
    }

    fn oracle(a: FakeBehavior, b: FakeBehavior) -> DivergenceOracle {
        DivergenceOracle::new(
            Box::new(FakeAdapter {
                name: "A",
                behavior: a,
            }),
            Box::new(FakeAdapter {
                name: "B",
                behavior: b,
            }),
            CompareMode::Structured,
            vec![0x00, b'\r', 0xFF],
        )
    }

    #[test]
    fn both_rejecting_is_uninteresting() {
        let oracle = oracle(FakeBehavior::Reject, FakeBehavior::Reject);
        let verdict = oracle.run_round(b"a=1z=2").expect("no adapter error");
        assert!(
            matches!(verdict, RoundVerdict::Uninteresting),
            "an input both decoders reject carries no signal, got {verdict:?}"
        );
    }

    #[test]
    fn split_accept_reject_is_a_divergence() {
        let oracle = oracle(
            FakeBehavior::Decode(r#"{"a": {"type": "integer", "value": "191"}}"#),
            FakeBehavior::Reject,
        );
        let verdict = oracle.run_round(b"a=0bfa").expect("no adapter error");
        match verdict {
            RoundVerdict::Divergence(report) => {
                assert!(report.failure.contains("disagree on validity"));
                assert!(matches!(report.outcome_a, DecodeOutcome::Decoded(_)));
                assert_eq!(report.outcome_b, DecodeOutcome::Rejected);
                assert_eq!(report.input_hash, format!("{:x}", md5::compute(b"a=0bfa")));
            }
            other => panic!("expected a divergence, got {other:?}"),
        }
    }

    #[test]
    fn suppressed_byte_turns_error_mismatch_into_skip() {
        let oracle = oracle(FakeBehavior::Reject, FakeBehavior::Decode("{}"));
        let verdict = oracle.run_round(b"a=1\rb=2").expect("no adapter error");
        match verdict {
            RoundVerdict::Skipped { reason } => {
                assert!(
                    reason.contains("0x0d"),
                    "skip reason must name the byte, got: {reason}"
                );
            }
            other => panic!("suppressed mismatch must be Skipped, not {other:?}"),
        }
    }

    #[test]
    fn suppression_does_not_apply_when_both_sides_decode() {
        // The allowlist routes around accept/reject adapter bugs only;
        // a genuine value agreement on such an input is still an agreement.
        let payload = r#"{"a": {"type": "integer", "value": "1"}}"#;
        let oracle = oracle(FakeBehavior::Decode(payload), FakeBehavior::Decode(payload));
        let verdict = oracle.run_round(b"a=1\r").expect("no adapter error");
        assert!(matches!(verdict, RoundVerdict::Agreement), "got {verdict:?}");
    }

    #[test]
    fn underscore_grouped_integer_compares_equal() {
        // `a=1_2`: both compliant decoders resolve to integer 12.
        let oracle = oracle(
            FakeBehavior::Decode(r#"{"a": {"type": "integer", "value": "12"}}"#),
            FakeBehavior::Decode(r#"{"a": {"type": "integer", "value": "12"}}"#),
        );
        let verdict = oracle.run_round(b"a=1_2").expect("no adapter error");
        assert!(matches!(verdict, RoundVerdict::Agreement), "got {verdict:?}");
    }

    #[test]
    fn key_order_in_payloads_is_insignificant() {
        let oracle = oracle(
            FakeBehavior::Decode(
                r#"{"dog": {"tater.man": {"type": {"name": {"type": "string", "value": "pug"}}}},
                    "x": {"type": "bool", "value": "true"}}"#,
            ),
            FakeBehavior::Decode(
                r#"{"x": {"type": "bool", "value": "true"},
                    "dog": {"tater.man": {"type": {"name": {"type": "string", "value": "pug"}}}}}"#,
            ),
        );
        let verdict = oracle
            .run_round(b"[dog.\"tater.man\"]\ntype.name = \"pug\"\nx = true")
            .expect("no adapter error");
        assert!(matches!(verdict, RoundVerdict::Agreement), "got {verdict:?}");
    }

    #[test]
    fn value_mismatch_reports_localized_failure() {
        let oracle = oracle(
            FakeBehavior::Decode(r#"{"a": {"b": {"type": "integer", "value": "1"}}}"#),
            FakeBehavior::Decode(r#"{"a": {"b": {"type": "integer", "value": "2"}}}"#),
        );
        let verdict = oracle.run_round(b"[a]\nb=1").expect("no adapter error");
        match verdict {
            RoundVerdict::Divergence(report) => {
                assert!(
                    report.failure.contains("`a.b`"),
                    "failure must carry the document path, got: {}",
                    report.failure
                );
                let rendered = report.to_string();
                assert!(rendered.contains("decoder A"));
                assert!(rendered.contains("decoder B"));
            }
            other => panic!("expected a divergence, got {other:?}"),
        }
    }

    #[test]
    fn adapter_failure_propagates_fatally() {
        let oracle = oracle(FakeBehavior::Fail, FakeBehavior::Reject);
        let err = oracle
            .run_round(b"a=1")
            .expect_err("adapter failure must not become a verdict");
        assert!(matches!(err, RoundError::Adapter(_)));
    }

    #[test]
    fn both_adapters_are_invoked_before_a_fatal_error_propagates() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingAdapter {
            name: &'static str,
            behavior: FakeBehavior,
            calls: Arc<AtomicUsize>,
        }

        impl DecoderAdapter for CountingAdapter {
            fn name(&self) -> &str {
                self.name
            }

            fn decode(&self, _input: &[u8]) -> Result<DecodeOutcome, AdapterError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                match &self.behavior {
                    FakeBehavior::Decode(payload) => {
                        Ok(DecodeOutcome::Decoded(payload.to_string()))
                    }
                    FakeBehavior::Reject => Ok(DecodeOutcome::Rejected),
                    FakeBehavior::Fail => Err(AdapterError::Io {
                        name: self.name.to_string(),
                        detail: "scripted adapter failure".to_string(),
                    }),
                }
            }
        }

        let calls_b = Arc::new(AtomicUsize::new(0));
        let oracle = DivergenceOracle::new(
            Box::new(CountingAdapter {
                name: "A",
                behavior: FakeBehavior::Fail,
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            Box::new(CountingAdapter {
                name: "B",
                behavior: FakeBehavior::Reject,
                calls: Arc::clone(&calls_b),
            }),
            CompareMode::Structured,
            Vec::new(),
        );
        let err = oracle
            .run_round(b"a=1")
            .expect_err("adapter failure must still propagate");
        assert!(matches!(err, RoundError::Adapter(_)));
        assert_eq!(
            calls_b.load(Ordering::SeqCst),
            1,
            "adapter B must complete its invocation even when A fails"
        );
    }

    #[test]
    fn unparseable_success_payload_is_fatal() {
        let oracle = oracle(
            FakeBehavior::Decode("not json at all"),
            FakeBehavior::Decode("{}"),
        );
        let err = oracle
            .run_round(b"a=1")
            .expect_err("garbage payload must not become a verdict");
        match err {
            RoundError::MalformedOutput { adapter, .. } => assert_eq!(adapter, "A"),
            other => panic!("expected MalformedOutput, got {other:?}"),
        }
    }

    #[test]
    fn roundtrip_mode_tolerates_serialization_style() {
        let oracle = DivergenceOracle::new(
            Box::new(FakeAdapter {
                name: "A",
                behavior: FakeBehavior::Decode("b = \"x\"\na = 2\n"),
            }),
            Box::new(FakeAdapter {
                name: "B",
                behavior: FakeBehavior::Decode("a    = 2\nb = 'x'\n"),
            }),
            CompareMode::Roundtrip,
            Vec::new(),
        );
        let verdict = oracle.run_round(b"a=2\nb='x'").expect("no adapter error");
        assert!(
            matches!(verdict, RoundVerdict::Agreement),
            "quoting and whitespace are not divergences, got {verdict:?}"
        );
    }

    #[test]
    fn end_to_end_round_over_external_processes() {
        use crate::adapter::{CommandAdapter, CommandAdapterConfig, InputDelivery};
        use std::time::Duration;

        let sh_adapter = |name: &str, script: &str| {
            Box::new(CommandAdapter::new(
                name,
                CommandAdapterConfig {
                    command: vec![
                        "/bin/sh".to_string(),
                        "-c".to_string(),
                        script.to_string(),
                    ],
                    input_delivery: InputDelivery::Stdin,
                    timeout: Duration::from_secs(2),
                    working_dir: None,
                },
            ))
        };
        let payload = r#"{"a": {"type": "integer", "value": "12"}}"#;
        let oracle = DivergenceOracle::new(
            sh_adapter("A", &format!("cat > /dev/null; printf '%s' '{payload}'")),
            sh_adapter("B", &format!("cat > /dev/null; printf '%s' '{payload}'")),
            CompareMode::Structured,
            vec![b'\r'],
        );
        let verdict = oracle.run_round(b"a=1_2").expect("both processes run");
        assert!(matches!(verdict, RoundVerdict::Agreement), "got {verdict:?}");
    }

    #[test]
    fn verdict_classification_is_symmetric() {
        let payload_one = r#"{"a": {"type": "integer", "value": "1"}}"#;
        let payload_two = r#"{"a": {"type": "integer", "value": "2"}}"#;
        let forward = oracle(
            FakeBehavior::Decode(payload_one),
            FakeBehavior::Decode(payload_two),
        );
        let backward = oracle(
            FakeBehavior::Decode(payload_two),
            FakeBehavior::Decode(payload_one),
        );
        let verdict_fwd = forward.run_round(b"a=?").expect("no adapter error");
        let verdict_bwd = backward.run_round(b"a=?").expect("no adapter error");
        match (verdict_fwd, verdict_bwd) {
            (RoundVerdict::Divergence(f), RoundVerdict::Divergence(b)) => {
                assert!(f.failure.contains("`a`"));
                assert!(b.failure.contains("`a`"));
            }
            other => panic!("both orders must diverge, got {other:?}"),
        }
    }
}
