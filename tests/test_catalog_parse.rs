use chrono::{TimeZone, Utc};
use landsat_cube::io::catalog::{parse_catalog_response, Catalog, CatalogClient, CatalogConfig};
use landsat_cube::io::retry::RetryPolicy;
use landsat_cube::types::{CubeError, TileId};

const CMR_PAGE: &str = r#"{
  "feed": {
    "updated": "2019-05-01T12:00:00.000Z",
    "title": "ECHO granule metadata",
    "entry": [
      {
        "title": "LC08_L1TP_047027_20130421_20170310_01_T1",
        "time_start": "2013-04-21T18:59:46.000Z",
        "time_end": "2013-04-21T19:00:18.000Z",
        "polygons": [["47.1 -122.5 47.2 -119.9 45.5 -119.8 45.4 -122.4 47.1 -122.5"]],
        "browse_flag": true
      },
      {
        "title": "LC08_L1TP_047027_20130507_20170310_01_T1",
        "polygons": []
      },
      {
        "title": "LANDSAT_BROWSE_047027",
        "time_start": "2013-05-23T18:59:46.000Z"
      }
    ]
  }
}"#;

#[test]
fn test_parse_cmr_page() {
    let items = parse_catalog_response(CMR_PAGE).unwrap();
    assert_eq!(items.len(), 2);

    let april = &items[0];
    assert_eq!(april.identifier, "LC08_L1TP_047027_20130421_20170310_01_T1");
    assert_eq!(april.acquired, Utc.with_ymd_and_hms(2013, 4, 21, 18, 59, 46).unwrap());
    assert_eq!(april.footprints.len(), 1);
    assert_eq!(april.footprints[0].vertices.len(), 5);
    let bbox = april.bounding_box().unwrap();
    assert_eq!(bbox.min_lat, 45.4);
    assert_eq!(bbox.max_lat, 47.2);
    assert_eq!(bbox.min_lon, -122.5);
    assert_eq!(bbox.max_lon, -119.8);

    // no time_start: falls back to the identifier's date
    let may = &items[1];
    assert_eq!(may.acquired, Utc.with_ymd_and_hms(2013, 5, 7, 0, 0, 0).unwrap());
    assert!(may.bounding_box().is_none());
}

#[test]
fn test_empty_feed() {
    let items = parse_catalog_response(r#"{"feed": {"entry": []}}"#).unwrap();
    assert!(items.is_empty());
    let items = parse_catalog_response(r#"{"feed": {}}"#).unwrap();
    assert!(items.is_empty());
}

#[test]
fn test_broken_document_is_error() {
    assert!(matches!(parse_catalog_response("<html>busy</html>"), Err(CubeError::Json(_))));
}

#[test]
fn test_malformed_entries_are_skipped() {
    let _ = env_logger::builder().is_test(true).try_init();
    let page = r#"{"feed": {"entry": [
        {"title": "LC08_L1TP_047027_20130421_20170310_01_T1", "polygons": [["47.1 -122.5 47.2"]]},
        {"title": "LC08_L1TP_047027_20130507_20170310_01_T1", "polygons": [["47.1 north 47.2 -119.9"]]},
        {"title": "LC08_L1TP_047027_20130523_20170310_01_T1", "time_start": "yesterday"},
        {"title": "LC08_L1TP_047027_20130624_20170310_01_T1", "polygons": [["1 2 3 4 5 6 1 2"]]}
    ]}}"#;
    let items = parse_catalog_response(page).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].identifier, "LC08_L1TP_047027_20130624_20170310_01_T1");
    assert_eq!(items[0].footprints[0].vertices.len(), 4);
}

#[test]
fn test_unreachable_endpoint_is_catalog_unavailable() {
    let _ = env_logger::builder().is_test(true).try_init();
    let client = CatalogClient::new(CatalogConfig {
        // discard port on loopback; nothing listens there
        endpoint: "http://127.0.0.1:9/search/granules.json".to_string(),
        timeout_secs: 2,
        retry: RetryPolicy::none(),
        ..CatalogConfig::default()
    })
    .unwrap();

    let err = client.query_tile(TileId::new(47, 27)).unwrap_err();
    assert!(matches!(err, CubeError::CatalogUnavailable(_)), "{:?}", err);
}
