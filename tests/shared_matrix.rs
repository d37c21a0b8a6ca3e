use ndarray::{Array2, array};
use xc_argmax::{DType, EngineErr, SharedMatrixHandle, shared};

fn bits(values: impl IntoIterator<Item = f64>) -> Vec<u64> {
    values.into_iter().map(f64::to_bits).collect()
}

#[test]
fn float_round_trip_is_bit_identical() {
    let dir = tempfile::tempdir().unwrap();
    let weights = array![
        [-1.5, 0.0, -0.0, f64::MIN_POSITIVE],
        [0.0, 0.0, 0.0, 0.0],
        [f64::MAX, -f64::MAX, 1e-300, f64::NAN],
    ];

    let region = shared::publish_in(dir.path(), weights.view()).unwrap();
    assert_eq!(region.handle().shape(), (3, 4));
    assert_eq!(region.handle().dtype(), DType::Float64);

    let attached = shared::attach(region.handle()).unwrap();
    let view = attached.view::<f64>().unwrap();

    assert_eq!(view.dim(), (3, 4));
    assert_eq!(bits(view.iter().copied()), bits(weights.iter().copied()));
}

#[test]
fn int_round_trip_is_exact() {
    let dir = tempfile::tempdir().unwrap();
    let weights = array![[i32::MIN, -1, 0], [1, 42, i32::MAX]];

    let region = shared::publish_in(dir.path(), weights.view()).unwrap();
    let attached = shared::attach(region.handle()).unwrap();

    assert_eq!(attached.dtype(), DType::Int32);
    assert_eq!(attached.view::<i32>().unwrap(), weights);
}

#[test]
fn single_row_and_zero_row_matrices() {
    let dir = tempfile::tempdir().unwrap();

    let single = array![[3.0, -4.0, 0.5]];
    let region = shared::publish_in(dir.path(), single.view()).unwrap();
    assert_eq!(shared::attach(region.handle()).unwrap().view::<f64>().unwrap(), single);

    let empty = Array2::<f64>::zeros((0, 5));
    let region = shared::publish_in(dir.path(), empty.view()).unwrap();
    assert_eq!(region.handle().byte_len(), 0);

    let attached = shared::attach(region.handle()).unwrap();
    assert_eq!(attached.view::<f64>().unwrap().dim(), (0, 5));
}

#[test]
fn handle_survives_serialization() {
    let dir = tempfile::tempdir().unwrap();
    let weights = Array2::from_shape_fn((6, 3), |(r, c)| (r * 3 + c) as f64 - 7.0);
    let region = shared::publish_in(dir.path(), weights.view()).unwrap();

    // What a separately started worker would receive.
    let wire = serde_json::to_string(region.handle()).unwrap();
    let handle: SharedMatrixHandle = serde_json::from_str(&wire).unwrap();

    assert_eq!(&handle, region.handle());
    assert_eq!(shared::attach(&handle).unwrap().view::<f64>().unwrap(), weights);
}

#[test]
fn attachments_share_one_region() {
    let dir = tempfile::tempdir().unwrap();
    let weights = Array2::from_shape_fn((4, 4), |(r, c)| if r == c { 1 } else { 0 });
    let region = shared::publish_in(dir.path(), weights.view()).unwrap();

    let first = shared::attach(region.handle()).unwrap();
    let second = shared::attach(region.handle()).unwrap();

    assert_eq!(first.view::<i32>().unwrap(), second.view::<i32>().unwrap());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn attachment_outlives_release() {
    let dir = tempfile::tempdir().unwrap();
    let weights = array![[1.0, 2.0], [3.0, 4.0]];
    let region = shared::publish_in(dir.path(), weights.view()).unwrap();

    let attached = shared::attach(region.handle()).unwrap();
    let handle = region.handle().clone();
    region.release().unwrap();

    assert_eq!(attached.view::<f64>().unwrap(), weights);
    assert!(matches!(shared::attach(&handle), Err(EngineErr::Attach { .. })));
}

#[test]
fn unknown_dtype_is_rejected() {
    let json = r#"{"shape":[2,2],"dtype":"float16","path":"/dev/shm/nope"}"#;
    let err = serde_json::from_str::<SharedMatrixHandle>(json).unwrap_err();
    assert!(err.to_string().contains("float16"));

    assert!(matches!("complex128".parse::<DType>(), Err(EngineErr::UnsupportedType { .. })));
}
