//! Comma-separated stream scenarios (RFC 4180 quoting, CRLF records).

use std::sync::Arc;

use fedstream_protocol::NoBindCommands;
use fedstream_results::{Completion, ResultFormat, ResultParser};
use fedstream_tabular::{CollectSink, Term, VarSet};

fn parser(vars: &[&str]) -> ResultParser<CollectSink> {
    let vars = Arc::new(VarSet::new(vars.iter().copied().map(Arc::<str>::from)));
    let sink = CollectSink::new(Arc::clone(&vars), 64);
    ResultParser::new(ResultFormat::Csv, vars, sink, Box::new(NoBindCommands))
}

#[test]
fn crlf_records_with_quoting() {
    let mut p = parser(&["a", "b"]);
    p.feed(b"a,b\r\nplain,\"with,comma\"\r\n\"say \"\"hi\"\"\",x\r\n");
    p.end();
    assert!(matches!(p.completion(), Some(Completion::Ended)));
    assert_eq!(
        p.sink_mut().rows(),
        vec![
            vec![
                Some(Term::literal("plain")),
                Some(Term::literal("with,comma"))
            ],
            vec![Some(Term::literal("say \"hi\"")), Some(Term::literal("x"))],
        ]
    );
}

#[test]
fn quoted_cell_may_contain_record_terminator() {
    let mut p = parser(&["a"]);
    p.feed(b"a\r\n\"line one\r\nline two\"\r\n");
    p.end();
    assert_eq!(
        p.sink_mut().rows(),
        vec![vec![Some(Term::literal("line one\r\nline two"))]]
    );
}

#[test]
fn quoted_terminator_split_across_chunks() {
    let mut p = parser(&["a"]);
    p.feed(b"a\r\n\"before");
    p.feed(b"\r\nafter\"\r\n");
    p.end();
    assert!(matches!(p.completion(), Some(Completion::Ended)));
    assert_eq!(
        p.sink_mut().rows(),
        vec![vec![Some(Term::literal("before\r\nafter"))]]
    );
}

#[test]
fn iris_and_bnodes_keep_their_meaning() {
    let mut p = parser(&["a", "b"]);
    p.feed(b"a,b\r\n<http://ex.org/x>,_:b0\r\n");
    p.end();
    assert_eq!(
        p.sink_mut().rows(),
        vec![vec![
            Some(Term::iri("http://ex.org/x")),
            Some(Term::bnode("b0"))
        ]]
    );
}

#[test]
fn empty_cell_is_null_but_quoted_empty_is_a_literal() {
    let mut p = parser(&["a", "b"]);
    p.feed(b"a,b\r\n,\"\"\r\n");
    p.end();
    assert_eq!(
        p.sink_mut().rows(),
        vec![vec![None, Some(Term::literal(""))]]
    );
}

#[test]
fn header_cells_may_be_quoted_and_sigiled() {
    let mut p = parser(&["a", "b"]);
    p.feed(b"\"?a\",$b\r\nx,y\r\n");
    p.end();
    assert!(matches!(p.completion(), Some(Completion::Ended)));
    assert_eq!(
        p.sink_mut().rows(),
        vec![vec![Some(Term::literal("x")), Some(Term::literal("y"))]]
    );
}

#[test]
fn control_frames_work_in_csv_too() {
    let mut p = parser(&["a"]);
    p.feed(b"a\r\nx\r\n!end\r\n");
    assert!(matches!(p.completion(), Some(Completion::Ended)));
    assert_eq!(p.sink_mut().total_rows(), 1);
}

#[test]
fn ask_result_over_csv() {
    let mut p = parser(&[]);
    p.feed(b"\r\ntrue\r\n");
    p.end();
    assert!(matches!(p.completion(), Some(Completion::Ended)));
    assert_eq!(p.sink_mut().total_rows(), 1);
}
