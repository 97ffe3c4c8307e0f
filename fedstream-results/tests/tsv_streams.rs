//! End-to-end tab-separated stream scenarios.

use std::sync::{Arc, Mutex};

use fedstream_protocol::{encode_sequence, Credit, Result, StreamError};
use fedstream_results::role::Prefill;
use fedstream_results::{Completion, ParserRole, ResultFormat, ResultParser};
use fedstream_tabular::{CollectSink, Term, VarSet};

/// Role that records binding-flow commands and resolves sequence numbers from
/// a canned table, standing in for the full correlator.
#[derive(Default)]
struct RecordingRole {
    credits: Arc<Mutex<Vec<Credit>>>,
    streaks: Arc<Mutex<Vec<u64>>>,
    prefills: Vec<(u64, Prefill)>,
}

impl fedstream_protocol::BindDelegate for RecordingRole {
    fn on_bind_request(&mut self, credit: Credit) -> Result<()> {
        self.credits.lock().unwrap().push(credit);
        Ok(())
    }

    fn on_bind_empty_streak(&mut self, seq: u64) -> Result<()> {
        self.streaks.lock().unwrap().push(seq);
        Ok(())
    }
}

impl ParserRole for RecordingRole {
    fn on_sequence(&mut self, seq: u64) -> Result<Prefill> {
        self.prefills
            .iter()
            .find(|(s, _)| *s == seq)
            .map(|(_, p)| p.clone())
            .ok_or_else(|| StreamError::violation(format!("unknown sequence {}", seq)))
    }
}

fn parser(vars: &[&str]) -> ResultParser<CollectSink> {
    let vars = Arc::new(VarSet::new(vars.iter().copied().map(Arc::<str>::from)));
    let sink = CollectSink::new(Arc::clone(&vars), 64);
    ResultParser::new(
        ResultFormat::Tsv,
        vars,
        sink,
        Box::new(fedstream_protocol::NoBindCommands),
    )
}

#[test]
fn header_projection_reorders_and_nulls() {
    // Input declares [b, a, c]; requested output order is [a, b].
    let mut p = parser(&["a", "b"]);
    p.feed(b"?b\t?a\t?c\n\"1\"\t\"2\"\t\"3\"\n");
    p.end();
    assert!(matches!(p.completion(), Some(Completion::Ended)));

    let rows = p.sink_mut().rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0],
        vec![Some(Term::literal("2")), Some(Term::literal("1"))]
    );
}

#[test]
fn requested_variable_absent_from_input_stays_null() {
    let mut p = parser(&["a", "x"]);
    p.feed(b"?a\n\"1\"\n");
    p.end();
    let rows = p.sink_mut().rows();
    assert_eq!(rows, vec![vec![Some(Term::literal("1")), None]]);
}

#[test]
fn ask_true_emits_one_zero_column_row() {
    let mut p = parser(&[]);
    p.feed(b"\n\"true\"\n");
    p.end();
    assert!(matches!(p.completion(), Some(Completion::Ended)));
    assert_eq!(p.sink_mut().total_rows(), 1);
}

#[test]
fn ask_with_no_data_line_is_false() {
    let mut p = parser(&[]);
    p.feed(b"\n");
    p.end();
    assert!(matches!(p.completion(), Some(Completion::Ended)));
    assert_eq!(p.sink_mut().total_rows(), 0);
}

#[test]
fn ask_second_data_line_is_error() {
    let mut p = parser(&[]);
    p.feed(b"\n\"true\"\n\"true\"\n");
    assert!(matches!(p.completion(), Some(Completion::Failed(_))));
}

#[test]
fn column_count_mismatch_is_terminal() {
    let mut p = parser(&["a", "b"]);
    p.feed(b"?a\t?b\n\"1\"\n");
    match p.completion() {
        Some(Completion::Failed(StreamError::MalformedInput { line, message, .. })) => {
            assert_eq!(*line, 2);
            assert!(message.contains("Missing columns"), "{}", message);
        }
        other => panic!("unexpected completion {:?}", other),
    }
    // Further input is ignored after the terminal error.
    p.feed(b"\"x\"\t\"y\"\n");
    assert_eq!(p.sink_mut().total_rows(), 0);
}

#[test]
fn extra_columns_are_terminal() {
    let mut p = parser(&["a"]);
    p.feed(b"?a\n\"1\"\t\"2\"\n");
    assert!(matches!(p.completion(), Some(Completion::Failed(_))));
}

#[test]
fn unterminated_quote_at_end_reports_position() {
    let mut p = parser(&["a"]);
    p.feed(b"?a\n\"abc");
    // More input may still arrive; nothing is wrong yet.
    assert!(p.completion().is_none());
    p.end();
    match p.completion() {
        Some(Completion::Failed(StreamError::MalformedInput { line, column, .. })) => {
            assert_eq!(*line, 2);
            assert_eq!(*column, 1);
        }
        other => panic!("unexpected completion {:?}", other),
    }
}

#[test]
fn quote_closed_in_later_chunk_parses() {
    let mut p = parser(&["a"]);
    p.feed(b"?a\n\"abc");
    p.feed(b"def\"\n");
    p.end();
    assert!(matches!(p.completion(), Some(Completion::Ended)));
    assert_eq!(
        p.sink_mut().rows(),
        vec![vec![Some(Term::literal("abcdef"))]]
    );
}

#[test]
fn control_frames_interleave_with_data() {
    let credits = Arc::new(Mutex::new(Vec::new()));
    let role = RecordingRole {
        credits: Arc::clone(&credits),
        ..Default::default()
    };
    let vars = Arc::new(VarSet::new(["a"]));
    let sink = CollectSink::new(Arc::clone(&vars), 64);
    let mut p = ResultParser::new(ResultFormat::Tsv, vars, sink, Box::new(role));

    p.feed(b"?a\n\"1\"\n!bind-request 5\n\"2\"\n!end\n");
    assert!(matches!(p.completion(), Some(Completion::Ended)));
    // The command was consumed as control, not data.
    assert_eq!(p.sink_mut().total_rows(), 2);
    assert_eq!(*credits.lock().unwrap(), vec![Credit::Limited(5)]);
}

#[test]
fn sequence_column_resolves_through_role() {
    let role = RecordingRole {
        prefills: vec![
            (0, vec![(0, Term::literal("bound0"))]),
            (1, vec![(0, Term::literal("bound1"))]),
        ],
        ..Default::default()
    };
    let vars = Arc::new(VarSet::new(["a", "x"]));
    let sink = CollectSink::new(Arc::clone(&vars), 64);
    let mut p = ResultParser::new(ResultFormat::Tsv, vars, sink, Box::new(role));

    let header = format!("?{}\t?x\n", fedstream_protocol::SEQ_VAR);
    let row0 = format!("\"{}\"\t\"x0\"\n", encode_sequence(0).unwrap());
    let row1 = format!("\"{}\"\t\"x1\"\n", encode_sequence(1).unwrap());
    p.feed(header.as_bytes());
    p.feed(row0.as_bytes());
    p.feed(row1.as_bytes());
    p.end();

    assert!(matches!(p.completion(), Some(Completion::Ended)));
    let rows = p.sink_mut().rows();
    assert_eq!(
        rows,
        vec![
            vec![Some(Term::literal("bound0")), Some(Term::literal("x0"))],
            vec![Some(Term::literal("bound1")), Some(Term::literal("x1"))],
        ]
    );
}

#[test]
fn prefix_declaration_applies_to_later_datatypes() {
    let mut p = parser(&["a"]);
    p.feed(b"?a\n!prefix xsd:http://www.w3.org/2001/XMLSchema#\n\"5\"^^xsd:byte\n");
    p.end();
    assert_eq!(
        p.sink_mut().rows(),
        vec![vec![Some(Term::literal_typed(
            "5",
            "http://www.w3.org/2001/XMLSchema#byte"
        ))]]
    );
}

#[test]
fn peer_error_is_terminal_and_distinguished() {
    let mut p = parser(&["a"]);
    p.feed(b"?a\n!error server ran out of memory\n");
    match p.completion() {
        Some(Completion::Failed(e)) => {
            assert!(e.is_peer_signaled());
            assert!(e.to_string().contains("server ran out of memory"));
        }
        other => panic!("unexpected completion {:?}", other),
    }
    assert!(p.peer_terminated());
}

#[test]
fn peer_cancel_is_terminal() {
    let mut p = parser(&["a"]);
    p.feed(b"?a\n!cancel\n");
    assert!(matches!(
        p.completion(),
        Some(Completion::Failed(StreamError::PeerCancelled))
    ));
}

#[test]
fn data_after_end_is_a_violation() {
    let mut p = parser(&["a"]);
    p.feed(b"?a\n\"1\"\n!end\n\"2\"\n");
    match p.completion() {
        Some(Completion::Failed(StreamError::MalformedInput { message, .. })) => {
            assert!(message.contains("after !end"), "{}", message);
        }
        other => panic!("unexpected completion {:?}", other),
    }
}

#[test]
fn unknown_control_command_is_a_hard_error() {
    let mut p = parser(&["a"]);
    p.feed(b"?a\n!mystery\n");
    assert!(matches!(p.completion(), Some(Completion::Failed(_))));
}

#[test]
fn ping_queues_an_ack() {
    let mut p = parser(&["a"]);
    p.feed(b"?a\n!ping\n\"1\"\n");
    let outbound = p.take_outbound();
    assert_eq!(outbound.len(), 1);
    assert_eq!(outbound[0].to_string(), "!ping-ack");
}

#[test]
fn row_split_across_feeds_flushes_eagerly() {
    let mut p = parser(&["a"]);
    p.feed(b"?a\n\"first\"\n\"sec");
    // Batch capacity is 64; nothing flushed yet.
    assert_eq!(p.sink_mut().batches().len(), 0);
    p.feed(b"ond\"\n");
    // The stalled row completed; the pending batch went out immediately.
    assert_eq!(p.sink_mut().batches().len(), 1);
    assert_eq!(p.sink_mut().total_rows(), 2);
    p.end();
    assert!(matches!(p.completion(), Some(Completion::Ended)));
}

#[test]
fn final_row_without_terminator_parses_at_end() {
    let mut p = parser(&["a"]);
    p.feed(b"?a\n\"last\"");
    p.end();
    assert!(matches!(p.completion(), Some(Completion::Ended)));
    assert_eq!(p.sink_mut().rows(), vec![vec![Some(Term::literal("last"))]]);
}

#[test]
fn transport_failure_via_fail_is_terminal_once() {
    let mut p = parser(&["a"]);
    p.feed(b"?a\n\"1\"\n");
    p.fail(StreamError::Transport("connection reset".into()));
    assert!(matches!(
        p.completion(),
        Some(Completion::Failed(StreamError::Transport(_)))
    ));
    // Committed rows were flushed best-effort.
    assert_eq!(p.sink_mut().total_rows(), 1);
    // A second terminal event is ignored.
    p.end();
    assert!(matches!(
        p.completion(),
        Some(Completion::Failed(StreamError::Transport(_)))
    ));
}

#[test]
fn closed_sink_cancels_parsing() {
    let vars = Arc::new(VarSet::new(["a"]));
    let mut sink = CollectSink::new(Arc::clone(&vars), 1);
    sink.close();
    let options = fedstream_results::ParserOptions {
        batch_rows: 1,
        ..Default::default()
    };
    let mut p = ResultParser::with_options(
        ResultFormat::Tsv,
        vars,
        sink,
        Box::new(fedstream_protocol::NoBindCommands),
        options,
    );
    // Batch capacity 1 forces a flush on the first row, which the closed
    // sink refuses.
    p.feed(b"?a\n\"1\"\n\"2\"\n");
    assert!(matches!(p.completion(), Some(Completion::Cancelled)));
}

#[test]
fn reset_allows_a_fresh_stream() {
    let mut p = parser(&["a"]);
    p.feed(b"?a\n\"1\"\n!end\n");
    assert!(matches!(p.completion(), Some(Completion::Ended)));

    p.reset();
    assert!(p.completion().is_none());
    p.feed(b"?a\n\"2\"\n");
    p.end();
    assert!(matches!(p.completion(), Some(Completion::Ended)));
}
