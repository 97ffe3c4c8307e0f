//! Chunk-boundary invariance: for any valid stream, feeding it as one chunk
//! must produce the same rows as splitting it at every possible byte
//! boundary.

use std::sync::Arc;

use fedstream_protocol::NoBindCommands;
use fedstream_results::{Completion, ResultFormat, ResultParser};
use fedstream_tabular::{CollectSink, Term, VarSet};

fn parse_with_split(
    format: ResultFormat,
    vars: &[&str],
    input: &[u8],
    split: Option<usize>,
) -> Vec<Vec<Option<Term>>> {
    let vars = Arc::new(VarSet::new(vars.iter().copied().map(Arc::<str>::from)));
    let sink = CollectSink::new(Arc::clone(&vars), 8);
    let mut p = ResultParser::new(format, vars, sink, Box::new(NoBindCommands));
    match split {
        None => p.feed(input),
        Some(at) => {
            p.feed(&input[..at]);
            p.feed(&input[at..]);
        }
    }
    p.end();
    assert!(
        matches!(p.completion(), Some(Completion::Ended)),
        "split {:?}: {:?}",
        split,
        p.completion()
    );
    p.sink_mut().rows()
}

fn assert_invariant(format: ResultFormat, vars: &[&str], input: &[u8]) {
    let whole = parse_with_split(format, vars, input, None);
    assert!(!whole.is_empty(), "fixture should produce rows");
    for at in 0..=input.len() {
        let split = parse_with_split(format, vars, input, Some(at));
        assert_eq!(split, whole, "split at byte {}", at);
    }
}

#[test]
fn tsv_every_split_point() {
    let input = b"?a\t?b\n\
        <http://ex.org/x>\t\"hi\"@en\n\
        !prefix xsd:http://www.w3.org/2001/XMLSchema#\n\
        \"5\"^^xsd:int\t_:b0\n\
        \t\"a\\tb\"\n\
        !end\n";
    assert_invariant(ResultFormat::Tsv, &["a", "b"], input);
}

#[test]
fn csv_every_split_point() {
    let input = b"a,b\r\n\
        plain,\"with,comma\"\r\n\
        \"multi\r\nline\",\"say \"\"hi\"\"\"\r\n\
        <http://ex.org/x>,\r\n";
    assert_invariant(ResultFormat::Csv, &["a", "b"], input);
}

#[test]
fn json_every_split_point() {
    let doc = serde_json::json!({
        "head": {"vars": ["a", "b"]},
        "results": {"bindings": [
            {"a": {"type": "uri", "value": "http://ex.org/x"},
             "b": {"type": "literal", "value": "esc\t\"q\" unié pair😀"}},
            {"b": {"type": "literal", "value": "5",
                   "datatype": "http://www.w3.org/2001/XMLSchema#integer"}}
        ]}
    });
    let input = serde_json::to_string_pretty(&doc).unwrap();
    assert_invariant(ResultFormat::Json, &["a", "b"], input.as_bytes());
}

#[test]
fn tsv_byte_at_a_time() {
    let input = b"?a\n\"one\"\n\"two\"\n!end\n";
    let vars = Arc::new(VarSet::new(["a"]));
    let sink = CollectSink::new(Arc::clone(&vars), 8);
    let mut p = ResultParser::new(ResultFormat::Tsv, vars, sink, Box::new(NoBindCommands));
    for b in input {
        p.feed(std::slice::from_ref(b));
    }
    assert!(matches!(p.completion(), Some(Completion::Ended)));
    assert_eq!(
        p.sink_mut().rows(),
        vec![
            vec![Some(Term::literal("one"))],
            vec![Some(Term::literal("two"))],
        ]
    );
}
