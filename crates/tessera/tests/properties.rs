//! Core guarantees of the bindings, checked end to end.

use proptest::prelude::*;
use tessera::{
    ArraySchema, ArrayType, Attribute, Context, Datatype, Dimension, Domain, Error, Query,
    QueryStatus, QueryType, Range, StatusReason, Subarray, VAR_NUM,
};
use tessera_testkit::{
    datatype_strategy, dense_1d, encode_strings, init_tracing, ordered_pair_strategy, sparse_keys,
    write_dense_i32, TestArray,
};

proptest! {
    #[test]
    fn make_buffer_allocates_exactly_n_elements(datatype in datatype_strategy(), n in 0usize..256) {
        let buffer = datatype.make_buffer(n).unwrap();
        prop_assert_eq!(buffer.len(), n);
        prop_assert_eq!(buffer.byte_len(), n as u64 * datatype.size());
    }

    #[test]
    fn extract_returns_bounds_and_a_zero_stride(
        (a, b) in ordered_pair_strategy(i64::MIN / 2, i64::MAX / 2)
    ) {
        let range = Range::new(a, b);
        prop_assert_eq!(range.extract::<i64>().unwrap(), [a, b, 0]);
        prop_assert!(range.extract::<i32>().unwrap_err().is_type_mismatch());
        prop_assert!(range.extract::<u64>().unwrap_err().is_type_mismatch());
        prop_assert!(range.extract::<String>().unwrap_err().is_type_mismatch());
    }
}

#[test]
fn freeing_twice_is_freeing_once() {
    let fixture = dense_1d([1, 4]);
    fixture.open(QueryType::Read).unwrap();
    fixture.free();
    fixture.free();
    assert!(matches!(fixture.is_open(), Err(Error::HandleFreed { what: "array" })));

    // The store still holds the array; a fresh handle opens it.
    let again = fixture.reopen_handle();
    again.open(QueryType::Read).unwrap();
    again.close().unwrap();

    let ctx = Context::new(None).unwrap();
    let copy = ctx.clone();
    ctx.free();
    copy.free();
    assert!(matches!(copy.set_tag("k", "v"), Err(Error::HandleFreed { what: "context" })));
}

#[test]
fn result_elements_for_a_var_nullable_attribute() {
    init_tracing();
    let ctx = Context::new(None).unwrap();
    let domain = Domain::new(&ctx).unwrap();
    domain
        .add_dimension(&Dimension::new(&ctx, "x", Datatype::Int64, [0i64, 9], None).unwrap())
        .unwrap();
    let v = Attribute::new(&ctx, "v", Datatype::Int32).unwrap();
    v.set_cell_val_num(VAR_NUM).unwrap();
    v.set_nullable(true).unwrap();
    let schema = ArraySchema::new(&ctx, ArrayType::Sparse).unwrap();
    schema.set_domain(&domain).unwrap();
    schema.add_attribute(&v).unwrap();
    let fixture = TestArray::create(ctx, "var-nullable", &schema);

    fixture.open(QueryType::Write).unwrap();
    let write = Query::new(&fixture, QueryType::Write).unwrap();
    write.set_data_buffer("x", vec![1i64, 2, 3]).unwrap();
    write.set_data_buffer("v", (1..=10).collect::<Vec<i32>>()).unwrap();
    write.set_offsets_buffer("v", vec![0, 16, 28]).unwrap();
    write.set_validity_buffer("v", vec![1, 0, 1]).unwrap();
    assert_eq!(write.submit().unwrap(), QueryStatus::Completed);
    fixture.close().unwrap();

    fixture.open(QueryType::Read).unwrap();
    let read = Query::new(&fixture, QueryType::Read).unwrap();
    read.set_data_buffer("v", vec![0i32; 32]).unwrap();
    read.set_offsets_buffer("v", vec![0; 8]).unwrap();
    read.set_validity_buffer("v", vec![0; 8]).unwrap();
    assert_eq!(read.submit().unwrap(), QueryStatus::Completed);

    let elements = read.result_buffer_elements().unwrap();
    assert_eq!(elements["v"], [3, 10, 3]);
    assert_eq!(read.result_offsets("v").unwrap(), vec![0, 16, 28]);
    assert_eq!(read.result_validity("v").unwrap(), vec![1, 0, 1]);
    assert_eq!(read.result_data::<i32>("v").unwrap(), (1..=10).collect::<Vec<_>>());
}

#[test]
fn dense_full_domain_round_trips() {
    let fixture = dense_1d([1, 100]);
    let values: Vec<i32> = (0..100).map(|i| i * 7 - 300).collect();
    write_dense_i32(&fixture, &values).unwrap();

    fixture.open(QueryType::Read).unwrap();
    let query = Query::new(&fixture, QueryType::Read).unwrap();
    query.set_data_buffer("a", vec![0i32; 100]).unwrap();
    assert_eq!(query.submit().unwrap(), QueryStatus::Completed);
    assert_eq!(query.result_data::<i32>("a").unwrap(), values);
}

#[test]
fn incomplete_read_finishes_on_resubmission() {
    let fixture = dense_1d([1, 2]);
    write_dense_i32(&fixture, &[7, 8]).unwrap();
    fixture.open(QueryType::Read).unwrap();

    let query = Query::new(&fixture, QueryType::Read).unwrap();
    query.set_data_buffer("a", vec![0i32; 1]).unwrap();

    assert_eq!(query.submit().unwrap(), QueryStatus::Incomplete);
    assert_eq!(query.status_details().unwrap(), StatusReason::UserBufferSize);
    assert_eq!(query.result_data::<i32>("a").unwrap(), vec![7]);

    assert_eq!(query.submit().unwrap(), QueryStatus::Completed);
    assert_eq!(query.result_data::<i32>("a").unwrap(), vec![8]);
    assert_eq!(query.status_details().unwrap(), StatusReason::None);
}

#[test]
fn never_written_arrays_are_empty() {
    let fixture = dense_1d([1, 10]);
    fixture.open(QueryType::Read).unwrap();
    let domains = fixture.non_empty_domain().unwrap();
    assert!(domains.is_empty);
    assert!(domains.domains.is_empty());
    assert_eq!(fixture.non_empty_domain_from_name("d").unwrap(), None);

    let keys = sparse_keys();
    keys.open(QueryType::Read).unwrap();
    assert!(keys.non_empty_domain().unwrap().is_empty);
    assert_eq!(keys.non_empty_domain_from_index(0).unwrap(), None);
}

#[test]
fn var_dimension_ranges_round_trip() {
    let fixture = sparse_keys();
    fixture.open(QueryType::Read).unwrap();
    let subarray = Subarray::new(&fixture).unwrap();

    assert_eq!(subarray.range_from_name("key", 0).unwrap(), Range::var("", ""));

    subarray.add_range_by_name("key", Range::var("from", "to")).unwrap();
    let range = subarray.range(0, 0).unwrap();
    assert_eq!(range.endpoints::<String>().unwrap(), ("from".to_string(), "to".to_string()));
    assert!(subarray.add_range(0, Range::new(1i64, 2)).unwrap_err().is_type_mismatch());
    assert!(subarray
        .add_range(1, Range::var("a", "b"))
        .unwrap_err()
        .is_type_mismatch());

    let (offsets, data) = encode_strings(&["from", "to"]);
    assert_eq!(offsets, vec![0, 4]);
    assert_eq!(data.len(), 6);
}
