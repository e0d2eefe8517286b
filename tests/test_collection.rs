//! Integration tests for indexed collections and restricted views.
//!
//! Run with:
//!   cargo test --test test_collection

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use corpus_vocab::error::AppError;
use corpus_vocab::models::{Document, NGram};
use corpus_vocab::store::{
    Collection, Filter, Indexed, Page, Projection, Selection, SliceSpec, Sort, Store,
    StoreOptions, Value,
};

// ── helpers ──────────────────────────────────────────────────────────────────

fn open_store(options: StoreOptions) -> (TempDir, Store) {
    let tmp = TempDir::new().expect("tempdir");
    let store = Store::open(tmp.path().join("corpus.db"), options).expect("open store");
    (tmp, store)
}

fn documents(store: &Store, n: usize) -> Collection<Document> {
    let docs = store.collection::<Document>();
    let records = (0..n)
        .map(|i| {
            let date = Utc.with_ymd_and_hms(2000 + i as i32, 6, 1, 0, 0, 0).unwrap();
            let mut doc = Document::new(format!("10.1/{i}"), format!("Title {i}"), "body", date);
            doc.citations = (i as i64) * 10;
            doc
        })
        .collect();
    docs.bulk_merge(records).expect("seed documents");
    docs
}

fn dois(cursor: impl Iterator<Item = Result<Document, AppError>>) -> Vec<String> {
    cursor.map(|d| d.unwrap().doi).collect()
}

// ── Collection ────────────────────────────────────────────────────────────────

#[test]
fn negative_positions_count_from_the_end() {
    let (_tmp, store) = open_store(StoreOptions::default());
    let docs = documents(&store, 5);

    let last = docs.by_position(-1).unwrap().unwrap();
    assert_eq!(Some(last.clone()), docs.by_position(4).unwrap());
    assert_eq!(last.doi, "10.1/4");
    assert_eq!(docs.by_position(-5).unwrap().unwrap().doi, "10.1/0");
    assert!(docs.by_position(5).unwrap().is_none());
    assert!(docs.by_position(-6).unwrap().is_none());
}

#[test]
fn slices_agree_with_positions() {
    // A small page size makes every slice cross page boundaries.
    let (_tmp, store) = open_store(StoreOptions { page_size: 2, ..StoreOptions::default() });
    let docs = documents(&store, 7);

    let cases = [
        SliceSpec::range(1, 6).step(2),
        SliceSpec::full().step(-3),
        SliceSpec::range(-2, 100),
        SliceSpec::starting(5).step(-1),
        SliceSpec::until(-4),
    ];
    for spec in cases {
        let resolved = spec.resolve(7).unwrap();
        let expected: Vec<String> = resolved
            .positions()
            .map(|p| docs.by_position(p as i64).unwrap().unwrap().doi)
            .collect();
        assert_eq!(dois(docs.by_slice(spec).unwrap()), expected, "slice {spec:?}");
    }
}

#[test]
fn empty_and_out_of_range_slices_are_empty() {
    let (_tmp, store) = open_store(StoreOptions::default());
    let docs = documents(&store, 3);
    assert_eq!(docs.by_slice(SliceSpec::range(5, 9)).unwrap().count(), 0);
    assert_eq!(docs.by_slice(SliceSpec::range(2, 1)).unwrap().count(), 0);

    let empty = store.collection::<NGram>();
    assert_eq!(empty.iter().unwrap().count(), 0);
    assert!(empty.by_position(0).unwrap().is_none());
}

#[test]
fn zero_step_is_an_invalid_indexer() {
    let (_tmp, store) = open_store(StoreOptions::default());
    let docs = documents(&store, 3);
    let err = docs.by_slice(SliceSpec::full().step(0)).unwrap_err();
    assert!(matches!(err, AppError::InvalidIndexer(_)));
}

#[test]
fn unknown_fields_are_rejected() {
    let (_tmp, store) = open_store(StoreOptions::default());
    let docs = documents(&store, 2);
    assert!(matches!(
        docs.columns(&["publisher"]).unwrap_err(),
        AppError::InvalidField { table: "documents", .. }
    ));
    assert!(matches!(
        docs.find_where(&[Filter::eq("publisher", "x")], &[], None).unwrap_err(),
        AppError::InvalidField { .. }
    ));
    assert!(matches!(docs.min("publisher").unwrap_err(), AppError::InvalidField { .. }));
}

#[test]
fn select_dispatches_on_indexer() {
    let (_tmp, store) = open_store(StoreOptions::default());
    let docs = documents(&store, 4);

    let one = docs.select(-1i64).unwrap().into_one().unwrap();
    assert_eq!(one.doi, "10.1/3");

    match docs.select(1i64..3).unwrap() {
        Selection::Many(cursor) => assert_eq!(dois(cursor), ["10.1/1", "10.1/2"]),
        other => panic!("expected a slice, got {other:?}"),
    }

    match docs.select("citations").unwrap() {
        Selection::Columns(cursor) => {
            let values: Vec<i64> = cursor
                .map(|p| p.unwrap().into_single().and_then(|v| v.as_i64()).unwrap())
                .collect();
            assert_eq!(values, [0, 10, 20, 30]);
        }
        other => panic!("expected a projection, got {other:?}"),
    }

    match docs.select(vec!["doi", "citations"]).unwrap() {
        Selection::Columns(mut cursor) => {
            let Projection::Tuple(record) = cursor.next().unwrap().unwrap() else {
                panic!("expected a record");
            };
            assert_eq!(record.get("doi"), Some(&Value::from("10.1/0")));
            assert_eq!(record.get("citations"), Some(&Value::Int(0)));
        }
        other => panic!("expected a projection, got {other:?}"),
    }

    assert!(matches!(
        docs.select(Vec::<&str>::new()).unwrap_err(),
        AppError::InvalidIndexer(_)
    ));
}

#[test]
fn find_where_sorts_and_pages() {
    let (_tmp, store) = open_store(StoreOptions::default());
    let docs = documents(&store, 6);

    let filters = [Filter::ge("citations", 10)];
    let sort = [Sort::desc("citations")];
    assert_eq!(docs.count_where(&filters).unwrap(), 5);

    let first = dois(docs.find_where(&filters, &sort, Some(Page::new(0, 2))).unwrap());
    let second = dois(docs.find_where(&filters, &sort, Some(Page::new(1, 2))).unwrap());
    assert_eq!(first, ["10.1/5", "10.1/4"]);
    assert_eq!(second, ["10.1/3", "10.1/2"]);

    let titled = dois(docs.find_where(&[Filter::contains("title", "le 3")], &[], None).unwrap());
    assert_eq!(titled, ["10.1/3"]);
}

#[test]
fn columns_from_starts_past_the_skipped_rows() {
    let (_tmp, store) = open_store(StoreOptions { page_size: 2, ..StoreOptions::default() });
    let docs = documents(&store, 5);
    let citations = |skip| -> Vec<i64> {
        docs.columns_from(&["citations"], skip)
            .unwrap()
            .map(|p| p.unwrap().into_single().and_then(|v| v.as_i64()).unwrap())
            .collect()
    };
    assert_eq!(citations(0), [0, 10, 20, 30, 40]);
    assert_eq!(citations(3), [30, 40]);
    assert!(citations(9).is_empty());
}

#[test]
fn ids_and_aggregates() {
    let (_tmp, store) = open_store(StoreOptions::default());
    let docs = documents(&store, 3);
    let ids: Vec<i64> = docs.ids().unwrap().map(Result::unwrap).collect();
    assert_eq!(ids, [1, 2, 3]);
    assert_eq!(docs.min("citations").unwrap(), Some(Value::Int(0)));
    assert_eq!(docs.max("citations").unwrap(), Some(Value::Int(20)));
    assert_eq!(store.collection::<NGram>().max("frequency").unwrap(), None);
}

#[test]
fn delete_without_filters_is_a_no_op() {
    let (_tmp, store) = open_store(StoreOptions::default());
    let docs = documents(&store, 3);
    assert_eq!(docs.delete_where(&[]).unwrap(), 0);
    assert_eq!(docs.len().unwrap(), 3);
    assert_eq!(docs.delete_where(&[Filter::lt("citations", 15)]).unwrap(), 2);
    assert_eq!(docs.len().unwrap(), 1);
}

#[test]
fn bulk_merge_updates_existing_rows() {
    let (_tmp, store) = open_store(StoreOptions::default());
    let docs = documents(&store, 2);
    let mut doc = docs.find(&1).unwrap().unwrap();
    doc.title = "Renamed".into();
    let fresh = Document::new("10.1/new", "New", "body", doc.date);

    let stored = docs.bulk_merge(vec![doc, fresh]).unwrap();
    assert_eq!(stored[0].id, Some(1));
    assert_eq!(stored[0].title, "Renamed");
    assert_eq!(stored[1].id, Some(3));
    assert_eq!(docs.len().unwrap(), 3);
}

#[test]
fn held_write_lock_is_a_write_conflict() {
    let (_tmp, store) = open_store(StoreOptions { busy_timeout_ms: 0, ..StoreOptions::default() });
    let ngrams = store.collection::<NGram>();

    let holder = store.connect().unwrap();
    holder.execute_batch("BEGIN IMMEDIATE").unwrap();

    let err = ngrams.bulk_merge(vec![NGram::new("graph", 2, 1)]).unwrap_err();
    assert!(err.is_write_conflict(), "got {err:?}");

    holder.execute_batch("ROLLBACK").unwrap();
    ngrams.bulk_merge(vec![NGram::new("graph", 2, 1)]).unwrap();
    assert_eq!(ngrams.len().unwrap(), 1);
}

// ── RestrictedView ────────────────────────────────────────────────────────────

#[test]
fn view_over_two_of_ten_rows() {
    let (_tmp, store) = open_store(StoreOptions::default());
    let docs = documents(&store, 10);
    let view = docs.restrict([5, 2, 5]).unwrap();

    assert_eq!(view.keys(), &[2, 5]);
    assert!(!view.is_complete());
    assert_eq!(view.len().unwrap(), 2);
    assert_eq!(view.by_position(0).unwrap().unwrap().id, Some(2));
    assert_eq!(view.by_position(-1).unwrap().unwrap().id, Some(5));
    assert!(view.by_position(2).unwrap().is_none());
    assert_eq!(dois(view.iter().unwrap()), ["10.1/1", "10.1/4"]);
    assert!(view.find(&3).unwrap().is_none());
    assert_eq!(view.count_where(&[Filter::ge("citations", 0)]).unwrap(), 2);
    assert_eq!(view.max("citations").unwrap(), Some(Value::Int(40)));
    assert_eq!(view.find_many(&[1, 2, 5, 9]).unwrap().len(), 2);
}

#[test]
fn complete_view_does_not_show_later_inserts() {
    let (_tmp, store) = open_store(StoreOptions::default());
    let docs = documents(&store, 3);
    let view = docs.restrict(docs.ids().unwrap().map(Result::unwrap)).unwrap();
    assert!(view.is_complete());

    let date = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    docs.bulk_merge(vec![Document::new("10.1/late", "Late", "body", date)]).unwrap();

    assert_eq!(docs.len().unwrap(), 4);
    assert_eq!(view.len().unwrap(), 3);
    assert_eq!(view.iter().unwrap().count(), 3);
    assert_eq!(view.count_where(&[]).unwrap(), 3);
}
