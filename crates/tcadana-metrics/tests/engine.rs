//! Engine-level behavior: determinism, input selection and batch isolation.

use std::path::PathBuf;

use tcadana_core::{
    AnalysisConfig, CurveQuantity, CurveRecord, FieldRecord, Fingerprint, FormatTag, MetricParams, QuantityClass,
    Record, RunId, SourceRef,
};
use tcadana_metrics::{ComputationError, MetricEngine, MetricKind, RunInputs, evaluate_batch};

fn src(format: FormatTag) -> SourceRef {
    SourceRef {
        file: PathBuf::from("input"),
        format,
    }
}

fn iv_curve() -> Record {
    let x: Vec<f64> = (0..=50).map(|i| -(i as f64) * 10.0).collect();
    let y: Vec<f64> = (0..=50).map(|i| 1e-10 * (i as f64 * 0.05).exp()).collect();
    Record::Curve(
        CurveRecord::new(
            "Anode TotalCurrent",
            CurveQuantity::Current,
            "Anode OuterVoltage",
            "V",
            "A",
            x,
            y,
            Some(253.15),
            src(FormatTag::DfiseXyPlot),
        )
        .unwrap(),
    )
}

fn field_2d(class: QuantityClass, name: &str, n: usize) -> Record {
    let mut x = Vec::new();
    let mut y = Vec::new();
    let mut v = Vec::new();
    for j in 0..n {
        for i in 0..n {
            x.push(i as f64);
            y.push(j as f64);
            v.push(1e5 * (-(j as f64) / 10.0).exp() * (1.0 + 0.01 * i as f64));
        }
    }
    Record::Field(
        FieldRecord::new(name, "V/cm", class, None, vec![x, y], v, None, src(FormatTag::GridV2)).unwrap(),
    )
}

fn fingerprint(b: u8) -> Fingerprint {
    Fingerprint::from_bytes([b; 32])
}

#[test]
fn results_are_bit_identical() {
    let records = vec![iv_curve(), field_2d(QuantityClass::ElectricField, "ElectricField", 40)];
    let params = MetricParams::default()
        .with_breakdown_current(1e-9)
        .with_cutline(0, 3.0, 0.5);
    let a = MetricEngine::new(params.clone()).unwrap();
    let b = MetricEngine::new(params).unwrap();
    for kind in [
        MetricKind::BreakdownVoltage,
        MetricKind::LeakageCurrent,
        MetricKind::PeakField,
        MetricKind::DepletionDepth,
    ] {
        let m1 = a.compute(kind, &records, fingerprint(1)).unwrap();
        let m2 = b.compute(kind, &records, fingerprint(1)).unwrap();
        assert!(m1.value.bit_eq(&m2.value), "{}", kind);
        assert_eq!(m1.params_digest, m2.params_digest);
    }
}

#[test]
fn breakdown_lies_inside_sweep() {
    let records = vec![iv_curve()];
    let engine = MetricEngine::new(MetricParams::default().with_breakdown_current(1e-9)).unwrap();
    let m = engine.compute(MetricKind::BreakdownVoltage, &records, fingerprint(1)).unwrap();
    let v = m.value.primary();
    assert!((-500.0..=0.0).contains(&v), "{}", v);
    assert_eq!(m.unit, "V");
    assert_eq!(m.rule_version, 1);
}

#[test]
fn missing_input_reported() {
    let records = vec![iv_curve()];
    let engine = MetricEngine::new(MetricParams::default()).unwrap();
    let err = engine.compute(MetricKind::SheetDoping, &records, fingerprint(1)).unwrap_err();
    assert!(matches!(err, ComputationError::MissingInput(_)));
}

#[test]
fn staleness_follows_fingerprint_and_params() {
    let records = vec![iv_curve()];
    let engine = MetricEngine::new(MetricParams::default().with_breakdown_current(1e-9)).unwrap();
    let m = engine.compute(MetricKind::BreakdownVoltage, &records, fingerprint(1)).unwrap();
    assert!(engine.is_current(&m, MetricKind::BreakdownVoltage, &fingerprint(1)));
    assert!(!engine.is_current(&m, MetricKind::BreakdownVoltage, &fingerprint(2)));

    let other = MetricEngine::new(MetricParams::default().with_breakdown_current(2e-9)).unwrap();
    assert!(!other.is_current(&m, MetricKind::BreakdownVoltage, &fingerprint(1)));
}

#[test]
fn batch_isolates_failures() {
    let good = vec![iv_curve()];
    let empty: Vec<Record> = Vec::new();
    let id_a = RunId::new("dev", "base", 0).unwrap();
    let id_b = RunId::new("dev", "base", 1).unwrap();
    let runs = [
        RunInputs {
            id: &id_a,
            fingerprint: fingerprint(1),
            records: &good,
        },
        RunInputs {
            id: &id_b,
            fingerprint: fingerprint(2),
            records: &empty,
        },
    ];
    let engine = MetricEngine::new(MetricParams::default().with_breakdown_current(1e-9)).unwrap();
    let out = evaluate_batch(
        &engine,
        &runs,
        &[MetricKind::BreakdownVoltage, MetricKind::PeakField],
    );

    let a = &out[&id_a];
    assert_eq!(a.metrics.len(), 1);
    assert_eq!(a.failures.len(), 1);
    assert!(!a.all_failed());

    let b = &out[&id_b];
    assert!(b.all_failed());
    assert_eq!(b.failures.len(), 2);
}

#[test]
fn compute_all_keeps_request_order() {
    let records = vec![iv_curve()];
    let engine = MetricEngine::new(MetricParams::default().with_breakdown_current(1e-9)).unwrap();
    let kinds = [MetricKind::LeakageCurrent, MetricKind::PeakField, MetricKind::BreakdownVoltage];
    let outcome = engine.compute_all(&kinds, &records, fingerprint(1));

    let names: Vec<&str> = outcome.metrics.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec![MetricKind::LeakageCurrent.name(), MetricKind::BreakdownVoltage.name()]);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].metric, MetricKind::PeakField);

    let single = engine.compute(MetricKind::BreakdownVoltage, &records, fingerprint(1)).unwrap();
    assert!(outcome.metrics[1].value.bit_eq(&single.value));
}

#[test]
fn analysis_engine_digest_tracks_parsing() {
    let plain = AnalysisConfig::default();
    let mut rebiased = AnalysisConfig::default();
    rebiased.parse.bias_dataset = Some("Cathode OuterVoltage".to_string());

    let a = MetricEngine::for_analysis(&plain).unwrap();
    let b = MetricEngine::for_analysis(&rebiased).unwrap();
    assert_eq!(a.params_digest(), plain.metric_digest().unwrap());
    assert_ne!(a.params_digest(), b.params_digest());

    let records = vec![iv_curve()];
    let m = a.compute(MetricKind::LeakageCurrent, &records, fingerprint(1)).unwrap();
    assert!(a.is_current(&m, MetricKind::LeakageCurrent, &fingerprint(1)));
    assert!(!b.is_current(&m, MetricKind::LeakageCurrent, &fingerprint(1)));
}
