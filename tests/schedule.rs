use ndarray::Array1;
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_isaac::Isaac64Rng;
use tempdir::TempDir;

use chamber_flux::config::SolverSettings;
use chamber_flux::diagnostics::silent;
use chamber_flux::schedule::{
    self, ChamberSpec, ScheduleBound, ScheduleResolver, UnitOfTime,
};
use chamber_flux::timelag::{ClosureTrace, TimelagEstimator, TimelagStatus};
use chamber_flux::Result;

const SCHEDULES: &str = r#"
[[schedule]]
name = "spring"
schedule_start = "2017-03-01"
schedule_end = "2017-06-01 12:00"
n_ch = 2
smpl_cycle_len = 600.0
n_cycle_per_day = 144
unit_of_time = "second"

[[schedule.chambers]]
ch_no = 1
A_ch = 0.0318
A_ch_std = 0.0318
V_ch = 0.0054
ch_label = "soil 1"
is_leaf_chamber = false
flowmeter_no = 1
TC_no = 2
ch_start = 0.0
ch_o_b = 60.0
ch_cls = 120.0
ch_o_a = 60.0
ch_end = 300.0
ch_atm_a = 30.0
optimize_timelag = true
timelag_nominal = 10.2
timelag_upper_limit = 10.45
timelag_lower_limit = 10.05

[[schedule.chambers]]
ch_no = 2
A_ch = 0.0318
A_ch_std = 0.0318
V_ch = 0.0054
ch_label = "leaf 1"
is_leaf_chamber = true
PAR_no = 1
ch_start = 300.0
ch_o_b = 60.0
ch_cls = 120.0
ch_o_a = 60.0
ch_end = 600.0
ch_atm_a = 30.0
optimize_timelag = false
timelag_nominal = 12.0
timelag_upper_limit = 20.0
timelag_lower_limit = 5.0

[[schedule]]
name = "summer"
schedule_start = 151.5
schedule_end = 243
n_ch = 0
smpl_cycle_len = 0.25
n_cycle_per_day = 96
unit_of_time = "hr"
"#;

fn write_schedules(test_name: &str) -> Result<TempDir> {
    let tmp_dir = TempDir::new(test_name)?;
    std::fs::write(tmp_dir.path().join("schedule.toml"), SCHEDULES)?;
    Ok(tmp_dir)
}

fn random_chamber<R: Rng>(number: u32, rng: &mut R) -> ChamberSpec {
    let open_before = rng.gen_range(30.0..90.0);
    let closure = rng.gen_range(60.0..300.0);
    let open_after = rng.gen_range(30.0..90.0);
    let lag = rng.gen_range(5.0..20.0);
    ChamberSpec {
        number,
        area: rng.gen_range(0.01..0.1),
        standard_area: 0.0318,
        volume: rng.gen_range(0.001..0.01),
        label: format!("chamber {number}"),
        is_leaf_chamber: rng.gen(),
        flowmeter: Some(rng.gen_range(0..4)),
        thermocouple: rng.gen::<bool>().then(|| rng.gen_range(0..4)),
        par_sensor: None,
        start: f64::from(number) * 300.,
        open_before,
        closure,
        open_after,
        end: open_before + closure + open_after,
        atmosphere_after: 30.,
        optimize_timelag: rng.gen(),
        timelag_nominal: lag,
        timelag_upper_limit: lag + 2.,
        timelag_lower_limit: lag - 2.,
    }
}

#[test]
fn schedules_load_in_file_order() -> Result<()> {
    let working_dir = write_schedules("schedules_load_in_file_order")?;
    let definitions = schedule::from_file(&working_dir.path().join("schedule.toml"))?;

    assert_eq!(definitions.len(), 2);
    assert_eq!(definitions[0].name, "spring");
    assert_eq!(definitions[1].name, "summer");
    assert_eq!(definitions[0].unit_of_time, UnitOfTime::Second);
    assert_eq!(definitions[1].unit_of_time, UnitOfTime::Hour);
    assert_eq!(definitions[1].schedule_start, ScheduleBound::DayOfYear(151.5));
    assert!(matches!(
        definitions[0].schedule_start,
        ScheduleBound::Timestamp(_)
    ));

    let leaf = &definitions[0].chambers[1];
    assert!(leaf.is_leaf_chamber);
    assert_eq!(leaf.flowmeter, None);
    assert_eq!(leaf.par_sensor, Some(1));
    assert!(definitions[1].chambers.is_empty());
    Ok(())
}

#[test]
fn missing_schedule_file_is_an_error() {
    let working_dir = TempDir::new("missing_schedule_file_is_an_error").unwrap();
    assert!(schedule::from_file(&working_dir.path().join("schedule.toml")).is_err());
}

#[test]
fn unparseable_bounds_are_rejected_on_load() {
    let contents = SCHEDULES.replace("2017-06-01 12:00", "first of June");
    assert!(schedule::from_toml_str(&contents).is_err());
}

#[test]
fn chamber_count_mismatch_is_rejected_on_load() {
    let contents = SCHEDULES.replacen("n_ch = 2", "n_ch = 3", 1);
    assert!(schedule::from_toml_str(&contents).is_err());
}

#[test]
fn resolution_switches_schedules_at_the_boundary() -> Result<()> {
    let definitions = schedule::from_toml_str(SCHEDULES)?;
    let resolver = ScheduleResolver::new(silent());

    // 1 March is day 59 counting from zero, 1 June is day 151
    assert!(resolver.resolve(58.99, &definitions).is_none());
    assert_eq!(resolver.resolve(59., &definitions).unwrap().name, "spring");
    assert_eq!(resolver.resolve(151.49, &definitions).unwrap().name, "spring");
    assert_eq!(resolver.resolve(151.5, &definitions).unwrap().name, "summer");
    assert!(resolver.resolve(243., &definitions).is_none());

    let summer = resolver.resolve(200., &definitions).unwrap();
    approx::assert_relative_eq!(summer.smpl_cycle_len, 0.25 / 24.);
    Ok(())
}

#[test]
fn chamber_table_is_read_from_csv() -> Result<()> {
    let seed = 40;
    let mut rng = Isaac64Rng::seed_from_u64(seed);
    let chambers = (1..=6)
        .map(|number| random_chamber(number, &mut rng))
        .collect::<Vec<_>>();

    let working_dir = TempDir::new("chamber_table_is_read_from_csv")?;
    let path = working_dir.path().join("chambers.csv");
    let mut wtr = csv::Writer::from_path(&path)?;
    for chamber in &chambers {
        wtr.serialize(chamber)?;
    }
    wtr.flush()?;

    let read = schedule::read_chamber_table(&path)?;
    assert_eq!(read.len(), chambers.len());
    for (read, written) in read.iter().zip(&chambers) {
        assert_eq!(read.number, written.number);
        assert_eq!(read.label, written.label);
        assert_eq!(read.thermocouple, written.thermocouple);
        assert_eq!(read.optimize_timelag, written.optimize_timelag);
        approx::assert_relative_eq!(read.closure, written.closure);
        approx::assert_relative_eq!(read.timelag_lower_limit, written.timelag_lower_limit);
    }
    Ok(())
}

#[test]
fn missing_chamber_table_is_an_error() {
    let working_dir = TempDir::new("missing_chamber_table_is_an_error").unwrap();
    assert!(schedule::read_chamber_table(&working_dir.path().join("chambers.csv")).is_err());
}

#[test]
fn resolved_schedule_drives_the_timelag_search() -> Result<()> {
    let working_dir = write_schedules("resolved_schedule_drives_the_timelag_search")?;
    let definitions = schedule::from_file(&working_dir.path().join("schedule.toml"))?;
    let resolved = ScheduleResolver::new(silent())
        .resolve(100.25, &definitions)
        .unwrap();

    let turnover_time = 10.;
    let timing = resolved.closure_timing(0, turnover_time).unwrap();
    let search = resolved.lag_search(0).unwrap();
    assert!(resolved.lag_search(1).is_none());
    approx::assert_relative_eq!(resolved.nominal_timelag(1).unwrap(), 12., max_relative = 1e-12);

    let true_lag = 10.25;
    let time = Array1::from_iter((0..=600).map(|n| f64::from(n) * 0.5));
    let closure_start = true_lag + timing.open_before;
    let closure_end = closure_start + timing.close_duration;
    let concentration = time.mapv(|t| {
        let baseline = 0.01f64.mul_add(t, 400.);
        if t >= closure_start && t <= closure_end {
            800f64.mul_add(1. - (-(t - closure_start) / turnover_time).exp(), baseline)
        } else {
            baseline
        }
    });
    let trace = ClosureTrace::new(time, concentration)?;

    let result = TimelagEstimator::new(SolverSettings::default(), silent())
        .estimate(&trace, &timing, &search);

    assert_eq!(result.status, TimelagStatus::Converged);
    approx::assert_abs_diff_eq!(result.timelag, true_lag, epsilon = 1e-3);
    Ok(())
}
