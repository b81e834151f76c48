use std::io::Write;
use sweatrs::{
    Athlete, CpModelKind, CriticalPowerFitter, ImportManager, StreamKind, SweatError, WPrimeBalanceAlgorithm,
    WPrimeBalanceConfig, Workout,
};
use tempfile::NamedTempFile;

/// Integration tests that run complete import and analysis workflows

fn write_temp(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// Ten minutes of 1 Hz data: warm-up, a 2 minute effort above CP, recovery
fn interval_rows() -> Vec<(f64, f64)> {
    (0..600)
        .map(|t| {
            let power = match t {
                0..=179 => 150.0,
                180..=299 => 380.0,
                _ => 160.0,
            };
            let hr = 110.0 + (t as f64 / 10.0).min(50.0);
            (power, hr)
        })
        .collect()
}

fn interval_csv() -> String {
    let mut csv = String::from("Time,Watts,Heart Rate\n");
    for (t, (power, hr)) in interval_rows().into_iter().enumerate() {
        csv.push_str(&format!("{},{},{}\n", t, power, hr));
    }
    csv
}

#[test]
fn test_csv_workflow() {
    let file = write_temp(".csv", &interval_csv());
    let mut workout = ImportManager::new().import_file(file.path()).unwrap();

    assert_eq!(workout.len(), 600);
    assert!(workout.stream(StreamKind::HeartRate).is_some());

    let curve = workout.compute_mean_max_power(true).unwrap();
    assert_eq!(curve.len(), 599);
    assert_eq!(curve[0], 380.0);
    assert_eq!(curve[119], 380.0);
    assert!(curve[120] < 380.0);
    assert!(curve.windows(2).all(|w| w[0] >= w[1]));

    let bests = workout.compute_mean_max_bests(60, 2).unwrap();
    assert_eq!(bests[0].value, 380.0);
    assert_eq!(bests[0].index, Some(239));
    // The rest of the effort is suppressed, next best overlaps its last 59 s
    assert_eq!(bests[1].index, Some(300));
    assert!(bests[1].value < 380.0 && bests[1].value > 370.0);

    workout.athlete = Athlete {
        cp: Some(300.0),
        w_prime: Some(20000.0),
        ..Athlete::default()
    };

    for algorithm in WPrimeBalanceAlgorithm::ALL {
        let config = WPrimeBalanceConfig {
            algorithm,
            ..WPrimeBalanceConfig::default()
        };
        let result = workout.compute_w_prime_balance(&config).unwrap();

        assert_eq!(result.balance.len(), 600);
        assert_eq!(result.balance[179], 20000.0);
        // 120 s at 80 W above CP expends 9600 J before any recovery
        assert!(result.min_balance >= 10400.0 - 1e-6);
        assert!(result.min_balance < 12500.0);
        assert!(result.balance[599] > result.min_balance);
        assert_eq!(result.time_below_zero, 0);
    }
}

#[test]
fn test_csv_time_gaps_become_missing_samples() {
    let csv = "time,power\n0,100\n1,110\n4,140\n5,150\n";
    let file = write_temp(".csv", csv);

    let workout = ImportManager::new().import_file(file.path()).unwrap();
    let power = workout.stream(StreamKind::Power).unwrap();

    assert_eq!(power.len(), 6);
    assert_eq!(power[1], 110.0);
    assert!(power[2].is_nan() && power[3].is_nan());
    assert_eq!(power[4], 140.0);

    // Gaps count as zero power in the mean-max curve
    let curve = workout.compute_mean_max_power(false).unwrap();
    assert_eq!(curve[0], 150.0);
    assert_eq!(curve[1], 145.0);
}

#[test]
fn test_json_workflow_with_athlete() {
    let power: Vec<String> = interval_rows().iter().map(|(p, _)| p.to_string()).collect();
    let json = format!(
        r#"{{"athlete": {{"ftp": 260.0, "lthr": 165.0, "weight": 70.0}}, "power": [{}]}}"#,
        power.join(",")
    );
    let file = write_temp(".json", &json);

    let workout = ImportManager::new().import_file(file.path()).unwrap();
    assert_eq!(workout.athlete.ftp, Some(260.0));

    let zones = workout.compute_time_in_power_zones().unwrap();
    assert_eq!(zones.len(), 7);
    assert_eq!(zones.iter().sum::<usize>(), 600);
    // 380 W is 146% of FTP
    assert_eq!(zones[5], 120);

    let wpk = workout.compute_power_per_kg().unwrap();
    assert!((wpk[200] - 380.0 / 70.0).abs() < 1e-12);

    assert!(matches!(
        workout.compute_time_in_heart_rate_zones(),
        Err(SweatError::MissingParameter { .. })
    ));
}

#[test]
fn test_missing_thresholds_are_reported() {
    let workout = Workout::new()
        .with_stream(StreamKind::Power, vec![200.0; 30])
        .unwrap();

    let error = workout
        .compute_w_prime_balance(&WPrimeBalanceConfig::default())
        .unwrap_err();
    match error {
        SweatError::MissingParameter { parameter, .. } => assert_eq!(parameter, "cp"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_unsupported_and_malformed_files() {
    let manager = ImportManager::new();

    let fit = write_temp(".fit", "binary");
    assert!(!manager.can_import_file(fit.path()));
    assert!(matches!(manager.import_file(fit.path()), Err(SweatError::Import { .. })));

    let bad_csv = write_temp(".csv", "time,power\n0,100\n1,fast\n");
    assert!(matches!(manager.import_file(bad_csv.path()), Err(SweatError::Import { .. })));

    let bad_json = write_temp(".json", "{\"power\": [1, 2");
    assert!(matches!(manager.import_file(bad_json.path()), Err(SweatError::Json(_))));
}

#[test]
fn test_fit_critical_power_from_imported_curve() {
    // Best efforts of a rider with CP 250 W and W' 18 kJ
    let mut power = Vec::new();
    for duration in [60usize, 180, 300, 600, 1200] {
        let watts = 250.0 + 18000.0 / duration as f64;
        power.extend(std::iter::repeat(watts).take(duration));
        power.extend(std::iter::repeat(100.0).take(600));
    }
    let workout = Workout::new().with_stream(StreamKind::Power, power).unwrap();
    let curve = workout.compute_mean_max_power(true).unwrap();

    let model = CriticalPowerFitter::new()
        .fit_mean_max(&curve[..1200], CpModelKind::TwoParameter)
        .unwrap();

    let cp = model.get("cp").unwrap();
    let w_prime = model.get("w_prime").unwrap();
    assert!(cp > 200.0 && cp < 300.0, "cp = {}", cp);
    assert!(w_prime > 10000.0 && w_prime < 30000.0, "w_prime = {}", w_prime);
}
