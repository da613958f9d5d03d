use std::time::{Duration, Instant};

use chrono::NaiveDate;

use super::*;

fn day() -> NaiveDate {
	NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
}

fn count_task(life: i64) -> Task {
	Task::new(
		1,
		"D1",
		day(),
		TaskConfig {
			app_name: "demo".into(),
			name: "watch".into(),
			life,
			bonus: 10,
			..TaskConfig::default()
		},
	)
	.unwrap()
}

#[test]
fn count_mode_completes_after_abs_life_updates() {
	let mut task = count_task(-3);
	let t0 = Instant::now();
	task.begin(t0);
	assert_eq!(task.state(), TaskState::Running);

	let d1 = task.update(t0 + Duration::from_secs(1), true);
	assert_eq!(d1.progress, Some(1.0));
	assert_eq!(d1.state, None);

	task.update(t0 + Duration::from_secs(2), true);
	let d3 = task.update(t0 + Duration::from_secs(3), true);
	assert_eq!(d3.progress, Some(3.0));
	assert_eq!(d3.state, Some(TaskState::Success));

	// Terminal is sticky: further updates are no-ops.
	let d4 = task.update(t0 + Duration::from_secs(4), true);
	assert!(d4.is_empty());
	assert_eq!(task.state(), TaskState::Success);
}

#[test]
fn time_mode_accrues_elapsed_seconds() {
	let mut task = count_task(10);
	let t0 = Instant::now();
	task.begin(t0);

	let delta = task.update(t0 + Duration::from_secs(4), true);
	assert_eq!(delta.progress, Some(4.0));
	assert_eq!(task.state(), TaskState::Running);

	let delta = task.update(t0 + Duration::from_secs(12), true);
	// Progress caps at |life| and the task succeeds exactly once.
	assert_eq!(delta.progress, Some(10.0));
	assert_eq!(delta.state, Some(TaskState::Success));
}

#[test]
fn zero_life_never_completes() {
	let mut task = count_task(0);
	let t0 = Instant::now();
	task.begin(t0);
	for i in 1..100 {
		let delta = task.update(t0 + Duration::from_secs(i), true);
		assert_eq!(delta.state, None);
	}
	assert_eq!(task.state(), TaskState::Running);
	assert_eq!(task.progress(), 0.0);
	// Score still accrues.
	assert_eq!(task.score(), 990);
}

#[test]
fn failed_check_accrues_nothing() {
	let mut task = count_task(-3);
	let t0 = Instant::now();
	task.begin(t0);
	let delta = task.update(t0 + Duration::from_secs(1), false);
	assert!(delta.is_empty());
	assert_eq!(task.progress(), 0.0);
	assert_eq!(task.score(), 0);
}

#[test]
fn progress_is_monotonic_while_running() {
	let mut task = count_task(-10);
	let t0 = Instant::now();
	task.begin(t0);
	let mut last = 0.0;
	for i in 0..20u64 {
		task.update(t0 + Duration::from_secs(i), i % 3 != 0);
		assert!(task.progress() >= last);
		last = task.progress();
	}
}

#[test]
fn stop_records_state_and_progress() {
	let mut task = count_task(-5);
	let t0 = Instant::now();
	task.begin(t0);
	task.update(t0 + Duration::from_secs(1), true);

	let delta = task.stop(TaskState::Paused);
	assert_eq!(delta.state, Some(TaskState::Paused));
	assert_eq!(delta.progress, Some(1.0));

	// Paused resumes to Running; a second pause while paused is a no-op.
	assert!(task.stop(TaskState::Paused).is_empty());
	let delta = task.resume(t0 + Duration::from_secs(2));
	assert_eq!(delta.state, Some(TaskState::Running));

	// External end from pause is allowed.
	task.stop(TaskState::Paused);
	let delta = task.stop(TaskState::Failed);
	assert_eq!(delta.state, Some(TaskState::Failed));

	// Terminal states never re-enter Running.
	assert!(task.resume(t0 + Duration::from_secs(3)).is_empty());
	assert!(task.begin(t0 + Duration::from_secs(3)).is_empty());
	assert_eq!(task.state(), TaskState::Failed);
}

#[test]
fn apply_dispatches_by_field_name() {
	let mut task = count_task(-5);
	assert!(task.apply("life", &serde_json::json!(20)).unwrap());
	assert!(!task.apply("life", &serde_json::json!(20)).unwrap());
	assert!(task.apply("score", &serde_json::json!(55)).unwrap());
	assert!(task.apply("state", &serde_json::json!("paused")).unwrap());
	assert_eq!(task.state(), TaskState::Paused);
	assert!(matches!(
		task.apply("nope", &serde_json::json!(1)),
		Err(Error::UnknownField(_))
	));
}

#[test]
fn delta_envelope_carries_only_changed_fields() {
	let mut task = count_task(-3);
	let t0 = Instant::now();
	task.begin(t0);
	let delta = task.update(t0 + Duration::from_secs(1), true);
	let envelope = delta.into_envelope("D1", "demo", "watch");
	let json = serde_json::to_string(&envelope).unwrap();
	assert!(json.contains("progress"));
	assert!(!json.contains("life"));
	assert!(!json.contains("state"));
}

#[test]
fn store_day_keying_creates_fresh_records_per_day() {
	let store = MemoryTaskStore::new();
	let catalog = TaskCatalog::new();
	catalog.register(TaskConfig {
		app_name: "demo".into(),
		name: "watch".into(),
		life: -3,
		..TaskConfig::default()
	});

	let mut set = TaskSet::new("D1", day());
	let id_day1 = set.get_or_create("demo", "watch", &store, &catalog).unwrap().id();

	// Same day, same record.
	let mut set = TaskSet::new("D1", day());
	set.load_day(&store, &catalog).unwrap();
	assert_eq!(set.get("demo/watch").unwrap().id(), id_day1);

	// New day, new record; the old one survives in the store.
	let next_day = day().succ_opt().unwrap();
	let mut set = TaskSet::new("D1", day());
	set.ensure_day(next_day);
	let id_day2 = set.get_or_create("demo", "watch", &store, &catalog).unwrap().id();
	assert_ne!(id_day1, id_day2);
	assert!(store.load_task("D1", "demo", "watch", day()).is_some());
}

#[test]
fn from_record_restores_progress() {
	let record = TaskRecord {
		id: 7,
		device_id: "D1".into(),
		app_name: "demo".into(),
		task_name: "watch".into(),
		date: day(),
		state: TaskState::Paused,
		progress: 2.0,
		score: 30,
		life: -5,
	};
	let task = Task::from_record(record.clone(), TaskConfig {
		app_name: "demo".into(),
		name: "watch".into(),
		life: -5,
		..TaskConfig::default()
	})
	.unwrap();
	assert_eq!(task.to_record(), record);
	assert_eq!(task.progress_ratio(), 0.4);
}
