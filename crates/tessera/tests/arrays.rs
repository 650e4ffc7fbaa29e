//! Array lifecycle, non-empty domains and metadata across handles.

use tessera::{
    Array, Bounds, Config, Context, Datatype, Error, MetadataValue, Query, QueryType, Range,
    Subarray,
};
use tessera_testkit::{dense_1d, dense_2d, sparse_grid, write_dense_i32};

fn write_grid(array: &Array, cells: &[(i32, i32, f32)]) {
    array.open(QueryType::Write).unwrap();
    let query = Query::new(array, QueryType::Write).unwrap();
    query.set_data_buffer("i", cells.iter().map(|c| c.0).collect()).unwrap();
    query.set_data_buffer("j", cells.iter().map(|c| c.1).collect()).unwrap();
    query.set_data_buffer("v", cells.iter().map(|c| c.2).collect()).unwrap();
    query.submit().unwrap();
    array.close().unwrap();
}

#[test]
fn non_empty_domain_spans_every_fragment() {
    let fixture = sparse_grid();
    write_grid(&fixture, &[(3, 1, 0.0), (0, 9, 1.0)]);
    write_grid(&fixture, &[(7, 4, 2.0)]);

    fixture.open(QueryType::Read).unwrap();
    let domains = fixture.non_empty_domain().unwrap();
    assert!(!domains.is_empty);
    assert_eq!(domains.domains.len(), 2);
    assert_eq!(domains.get("i").unwrap().fixed::<i32>().unwrap(), [0, 7]);
    assert_eq!(domains.get("j").unwrap().fixed::<i32>().unwrap(), [1, 9]);
    assert!(domains.get("j").unwrap().fixed::<i64>().unwrap_err().is_type_mismatch());
    assert_eq!(domains.get("i").unwrap().strings(), None);

    let j = fixture.non_empty_domain_from_index(1).unwrap().unwrap();
    assert_eq!(j.dimension, "j");
    assert_eq!(j.datatype, Datatype::Int32);
    assert!(matches!(j.bounds, Bounds::Fixed(_)));
}

#[test]
fn dense_non_empty_domain_covers_the_written_block() {
    let fixture = dense_2d();
    fixture.open(QueryType::Write).unwrap();
    let block = Subarray::new(&fixture).unwrap();
    block.add_range(0, Range::new(2i32, 3)).unwrap();
    block.add_range(1, Range::new(1i32, 2)).unwrap();
    let write = Query::new(&fixture, QueryType::Write).unwrap();
    write.set_subarray(&block).unwrap();
    write.set_data_buffer("a", vec![7i32; 4]).unwrap();
    write.submit().unwrap();
    fixture.close().unwrap();

    fixture.open(QueryType::Read).unwrap();
    assert_eq!(
        fixture.non_empty_domain_from_name("rows").unwrap().unwrap().fixed::<i32>().unwrap(),
        [2, 3]
    );
    assert_eq!(
        fixture.non_empty_domain_from_name("cols").unwrap().unwrap().fixed::<i32>().unwrap(),
        [1, 2]
    );
    assert!(fixture.non_empty_domain_from_name("nope").is_err());
}

#[test]
fn readers_see_new_fragments_after_reopen() {
    let fixture = dense_1d([1, 3]);
    let reader = fixture.reopen_handle();
    reader.open(QueryType::Read).unwrap();
    assert!(reader.non_empty_domain().unwrap().is_empty);

    write_dense_i32(&fixture, &[4, 5, 6]).unwrap();
    assert!(reader.non_empty_domain().unwrap().is_empty);

    reader.reopen().unwrap();
    assert_eq!(
        reader.non_empty_domain_from_index(0).unwrap().unwrap().fixed::<i32>().unwrap(),
        [1, 3]
    );
    let query = Query::new(&reader, QueryType::Read).unwrap();
    query.set_data_buffer("a", vec![0i32; 3]).unwrap();
    query.submit().unwrap();
    assert_eq!(query.result_data::<i32>("a").unwrap(), vec![4, 5, 6]);
}

#[test]
fn queries_must_match_the_open_mode() {
    let fixture = dense_1d([1, 2]);
    assert!(Query::new(&fixture, QueryType::Read).is_err());

    fixture.open(QueryType::Read).unwrap();
    assert!(Query::new(&fixture, QueryType::Write).is_err());
    let schema = fixture.schema().unwrap();
    assert_eq!(schema.attribute_num().unwrap(), 1);
    let dimension = schema.domain().unwrap().dimension_from_index(0).unwrap();
    assert_eq!(dimension.domain::<i32>().unwrap(), Some([1, 2]));
}

#[test]
fn metadata_written_by_one_handle_is_read_by_another() {
    let fixture = dense_1d([1, 2]);
    fixture.open(QueryType::Write).unwrap();
    fixture
        .put_metadata("bounds", &MetadataValue::new(Datatype::Int64, vec![-5i64, 5]).unwrap())
        .unwrap();
    fixture
        .put_metadata("thumbnail", &MetadataValue::blob(vec![0xff, 0x00, 0x7f]).unwrap())
        .unwrap();
    fixture.close().unwrap();

    let other = fixture.reopen_handle();
    other.open(QueryType::Read).unwrap();
    assert_eq!(other.has_metadata_key("bounds").unwrap(), Some(Datatype::Int64));
    assert_eq!(other.has_metadata_key("missing").unwrap(), None);

    let map = other.metadata_map().unwrap();
    assert_eq!(map.keys().collect::<Vec<_>>(), vec!["bounds", "thumbnail"]);
    assert_eq!(map["bounds"].values::<i64>().unwrap(), vec![-5, 5]);
    assert_eq!(map["thumbnail"].values::<u8>().unwrap(), vec![0xff, 0x00, 0x7f]);
    assert_eq!(other.metadata_from_index(1).unwrap().0, "thumbnail");
}

#[test]
fn arrays_share_their_context_configuration() {
    let config = Config::new().unwrap();
    config.set("sm.memory_budget", "4096").unwrap();
    let ctx = Context::new(Some(&config)).unwrap();
    config.set("sm.memory_budget", "8").unwrap();
    assert_eq!(ctx.config().unwrap().get("sm.memory_budget").unwrap(), "4096");
    assert!(config.set("sm.memory_budget", "lots").is_err());

    let fixture = dense_1d([1, 2]);
    let array = Array::new(&ctx, &fixture.uri).unwrap();
    array.open(QueryType::Read).unwrap();
    ctx.free();
    assert!(matches!(array.is_open(), Err(Error::HandleFreed { what: "context" })));
}

fn read_dense_a(array: &Array) -> Vec<i32> {
    let read = Query::new(array, QueryType::Read).unwrap();
    read.set_data_buffer("a", vec![0i32; 4]).unwrap();
    read.submit().unwrap();
    read.result_data::<i32>("a").unwrap()
}

#[test]
fn opening_at_a_timestamp_travels_in_time() {
    let fixture = dense_1d([1, 4]);
    fixture.open_at(QueryType::Write, 42).unwrap();
    let write = Query::new(&fixture, QueryType::Write).unwrap();
    assert_eq!(write.fragment_num().unwrap(), 0);
    write.set_data_buffer("a", vec![1i32, 2, 3, 4]).unwrap();
    write.submit().unwrap();
    assert_eq!(write.fragment_num().unwrap(), 1);
    let fragment = write.fragment_uri(0).unwrap();
    assert!(fragment.starts_with(&fixture.uri), "{fragment}");
    assert!(fragment.contains("/__fragments/__42_42_"), "{fragment}");
    assert_eq!(write.fragment_uri(0).unwrap(), fragment);
    assert_eq!(write.fragment_timestamp_range(0).unwrap(), (42, 42));
    assert!(write.fragment_uri(1).is_err());
    fixture.close().unwrap();

    fixture.open_at(QueryType::Read, 41).unwrap();
    assert!(fixture.non_empty_domain().unwrap().is_empty);
    assert_eq!(read_dense_a(&fixture), vec![i32::MIN; 4]);
    fixture.close().unwrap();

    fixture.open_at(QueryType::Read, 42).unwrap();
    assert_eq!(read_dense_a(&fixture), vec![1, 2, 3, 4]);
    fixture.close().unwrap();
}
