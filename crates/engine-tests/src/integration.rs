#[cfg(test)]
mod tests {
    use crate::utils::{
        aggregate, aggregate_result, assert_number, filter, filter_ids, group_by, task_of,
        tasks_of,
    };
    use crate::{init_tracing, open_engine, seed_people, test_settings};
    use engine_core::store::{DatasetStore, JobQueue, ResultStore, TaskFilter, TaskStore};
    use futures::future::join_all;
    use model::core::value::Value;
    use model::execution::job::JobRequest;
    use model::execution::operation::{
        AggregateFn, FilterOp, OperationKind, Trigger, Variant,
    };
    use model::execution::output::{AggregateValue, TaskOutput};
    use model::execution::task::TaskStatus;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    // Settings: default chunk size (15,000 rows).
    // Scenario: a 40,000 row dataset goes through filter + group with
    // both variants.
    // Expected Outcome: three chunks per task, twelve batch results in
    // total, four completed tasks, and validation marks all of them valid.
    #[traced_test]
    #[tokio::test]
    async fn tc01() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(dir.path(), test_settings(15_000));
        let dataset = seed_people(&engine, 40_000).await;

        let summary = engine
            .create_run(
                dataset.id,
                vec![
                    filter("age", FilterOp::Ge, Value::Int(30)),
                    group_by(&["city"]),
                ],
            )
            .await
            .unwrap();
        assert_eq!(summary.task_ids.len(), 4);

        engine.drain_queue().await.unwrap();

        let tasks = tasks_of(&engine, summary.run_id).await;
        assert_eq!(tasks.len(), 4);
        let mut total_batches = 0;
        for task in &tasks {
            assert_eq!(task.status, TaskStatus::Completed, "{}", task.kind);
            let results = engine
                .store
                .results_for_task(task.id, 0, 100)
                .await
                .unwrap();
            assert_eq!(results.len(), 3);
            total_batches += results.len();
        }
        assert_eq!(total_batches, 12);

        // Ages are i % 90: 60 of every 90 rows pass `age >= 30`, plus
        // ten of the trailing 40 rows.
        let survivors = 444 * 60 + 10;
        let base_filter = task_of(
            &engine,
            summary.run_id,
            1,
            OperationKind::Filter,
            Variant::Baseline,
        )
        .await;
        assert_eq!(base_filter.metrics.input_rows, 40_000);
        assert_eq!(base_filter.metrics.output_rows, Some(survivors));

        let cand_filter = task_of(
            &engine,
            summary.run_id,
            1,
            OperationKind::Filter,
            Variant::Candidate,
        )
        .await;
        assert_eq!(base_filter.output, cand_filter.output);

        // Null cities keep the row out of every group.
        let grouped = (0..40_000u64).filter(|i| i % 90 >= 30 && i % 4 != 3).count() as u64;
        let base_group = task_of(
            &engine,
            summary.run_id,
            1,
            OperationKind::Group,
            Variant::Baseline,
        )
        .await;
        assert_eq!(base_group.metrics.input_rows, survivors);
        assert_eq!(base_group.metrics.output_rows, Some(grouped));

        let cand_group = task_of(
            &engine,
            summary.run_id,
            1,
            OperationKind::Group,
            Variant::Candidate,
        )
        .await;
        assert_eq!(base_group.output, cand_group.output);

        engine.enqueue_job(JobRequest::ValidateRuns).await.unwrap();
        engine.drain_queue().await.unwrap();

        for task in tasks_of(&engine, summary.run_id).await {
            assert!(task.validated, "{} {}", task.kind, task.variant);
            assert!(task.valid, "{} {}", task.kind, task.variant);
        }
    }

    // Scenario: a finished run is iterated; the second iteration reuses
    // the stored pipeline over the same rows.
    // Expected Outcome: iteration 2 produces byte-identical outputs, and
    // validation accepts both iterations.
    #[traced_test]
    #[tokio::test]
    async fn tc02() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(dir.path(), test_settings(30));
        let dataset = seed_people(&engine, 100).await;

        let summary = engine
            .create_run(
                dataset.id,
                vec![
                    filter("score", FilterOp::Ge, Value::Float(10.0)),
                    group_by(&["city"]),
                    aggregate("score", &[AggregateFn::Sum, AggregateFn::Count]),
                ],
            )
            .await
            .unwrap();
        engine.drain_queue().await.unwrap();

        let next = engine.iterate_run(summary.run_id).await.unwrap();
        assert_eq!(next.iteration, 2);
        engine.drain_queue().await.unwrap();

        // score >= 10 keeps i >= 20, minus the null sevenths.
        let expected_survivors = 68;
        for iteration in [1, 2] {
            let task = task_of(
                &engine,
                summary.run_id,
                iteration,
                OperationKind::Filter,
                Variant::Baseline,
            )
            .await;
            assert_eq!(task.metrics.output_rows, Some(expected_survivors));
        }

        // Same rows, same pipeline: the iterations agree exactly.
        for kind in [
            OperationKind::Filter,
            OperationKind::Group,
            OperationKind::Aggregate,
        ] {
            let first = task_of(&engine, summary.run_id, 1, kind, Variant::Baseline).await;
            let second = task_of(&engine, summary.run_id, 2, kind, Variant::Baseline).await;
            assert_eq!(first.output, second.output, "{kind}");
        }

        engine.enqueue_job(JobRequest::ValidateRuns).await.unwrap();
        engine.drain_queue().await.unwrap();
        let all = tasks_of(&engine, summary.run_id).await;
        assert_eq!(all.len(), 12);
        assert!(all.iter().all(|t| t.validated && t.valid));
    }

    // Settings: two scheduled iterations per eligible run.
    // Scenario: a completed user run is expanded by the scheduler job,
    // executed, validated, and then the scheduler runs again.
    // Expected Outcome: four system tasks, all valid; the second
    // expansion is a no-op.
    #[traced_test]
    #[tokio::test]
    async fn tc03() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(25);
        settings.scheduled_iterations = 2;
        let engine = open_engine(dir.path(), settings);
        let dataset = seed_people(&engine, 60).await;

        let summary = engine
            .create_run(dataset.id, vec![aggregate("age", &[AggregateFn::Mean])])
            .await
            .unwrap();
        engine.drain_queue().await.unwrap();

        engine
            .enqueue_job(JobRequest::PrepareScheduledRuns)
            .await
            .unwrap();
        engine.drain_queue().await.unwrap();

        let system = engine
            .store
            .list_tasks(&TaskFilter::all().trigger(Trigger::System))
            .await
            .unwrap();
        assert_eq!(system.len(), 4);
        assert!(system.iter().all(|t| t.run_id == summary.run_id));
        assert!(system.iter().all(|t| t.status == TaskStatus::Completed));

        engine.enqueue_job(JobRequest::ValidateRuns).await.unwrap();
        engine.drain_queue().await.unwrap();
        let everything = engine.store.list_tasks(&TaskFilter::all()).await.unwrap();
        assert_eq!(everything.len(), 6);
        assert!(everything.iter().all(|t| t.validated && t.valid));

        // The run is covered now, so a second expansion adds nothing.
        engine
            .enqueue_job(JobRequest::PrepareScheduledRuns)
            .await
            .unwrap();
        engine.drain_queue().await.unwrap();
        let after = engine
            .store
            .list_tasks(&TaskFilter::all().trigger(Trigger::System))
            .await
            .unwrap();
        assert_eq!(after.len(), 4);
    }

    // Scenario: reset drops tasks and batch results but keeps the rows;
    // delete drops the dataset with everything derived from it.
    // Expected Outcome: a resubmission after reset works over unchanged
    // row ids; after delete nothing is left.
    #[traced_test]
    #[tokio::test]
    async fn tc04() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(dir.path(), test_settings(10));
        let dataset = seed_people(&engine, 30).await;

        let first = engine
            .create_run(dataset.id, vec![aggregate("age", &[AggregateFn::Count])])
            .await
            .unwrap();
        engine.drain_queue().await.unwrap();
        let old_task = first.task_ids[0];

        engine
            .enqueue_job(JobRequest::ResetRuns {
                dataset_id: dataset.id,
            })
            .await
            .unwrap();
        engine.drain_queue().await.unwrap();

        assert!(
            engine
                .store
                .list_tasks(&TaskFilter::all())
                .await
                .unwrap()
                .is_empty()
        );
        assert!(
            engine
                .store
                .results_for_task(old_task, 0, 10)
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(engine.store.count_rows(dataset.id).await.unwrap(), 30);

        // The rows were untouched, so a fresh submission just works.
        let second = engine
            .create_run(dataset.id, vec![aggregate("age", &[AggregateFn::Count])])
            .await
            .unwrap();
        engine.drain_queue().await.unwrap();
        let task = task_of(
            &engine,
            second.run_id,
            1,
            OperationKind::Aggregate,
            Variant::Baseline,
        )
        .await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_number(&aggregate_result(&task, "age", AggregateFn::Count), 30.0);

        engine
            .enqueue_job(JobRequest::DeleteDataset {
                dataset_id: dataset.id,
            })
            .await
            .unwrap();
        engine.drain_queue().await.unwrap();

        assert!(engine.store.get_dataset(dataset.id).await.unwrap().is_none());
        assert_eq!(engine.store.count_rows(dataset.id).await.unwrap(), 0);
        assert!(
            engine
                .store
                .list_tasks(&TaskFilter::all())
                .await
                .unwrap()
                .is_empty()
        );
    }

    // Settings: 7-row chunks and a reconciler page size of 2, so both
    // the chunk loop and result paging have to work over many pages.
    // Scenario: group + aggregate without a filter over 100 rows.
    // Expected Outcome: fifteen batches per task, exact totals, null
    // city keys dropped from the grouping.
    #[traced_test]
    #[tokio::test]
    async fn tc05() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(7);
        settings.result_page_size = 2;
        let engine = open_engine(dir.path(), settings);
        let dataset = seed_people(&engine, 100).await;

        let summary = engine
            .create_run(
                dataset.id,
                vec![
                    group_by(&["city"]),
                    aggregate("age", &[AggregateFn::Mean, AggregateFn::Count]),
                ],
            )
            .await
            .unwrap();
        engine.drain_queue().await.unwrap();

        for task in tasks_of(&engine, summary.run_id).await {
            assert_eq!(task.status, TaskStatus::Completed);
            // No filter in the pipeline: inputs are the whole dataset.
            assert_eq!(task.metrics.input_rows, 100);
            let results = engine
                .store
                .results_for_task(task.id, 0, 100)
                .await
                .unwrap();
            assert_eq!(results.len(), 15);
        }

        let group = task_of(
            &engine,
            summary.run_id,
            1,
            OperationKind::Group,
            Variant::Baseline,
        )
        .await;
        assert_eq!(group.metrics.output_rows, Some(75));
        let Some(TaskOutput::Groups(entries)) = &group.output else {
            panic!("missing group output");
        };
        let by_city: HashMap<String, Vec<u64>> = entries
            .iter()
            .map(|e| {
                let Value::String(name) = &e.key[0] else {
                    panic!("unexpected key {:?}", e.key);
                };
                (name.clone(), e.members.clone())
            })
            .collect();
        assert_eq!(by_city.len(), 3);
        let eu: Vec<u64> = (0..100).step_by(4).collect();
        assert_eq!(by_city["eu"], eu);
        assert!(by_city["us"].windows(2).all(|w| w[0] < w[1]));

        let mean = task_of(
            &engine,
            summary.run_id,
            1,
            OperationKind::Aggregate,
            Variant::Baseline,
        )
        .await;
        // Ages wrap at 90: the first ninety rows average 44.5, the tail
        // ten pull the mean down to 40.5.
        assert_number(&aggregate_result(&mean, "age", AggregateFn::Mean), 40.5);
        assert_number(&aggregate_result(&mean, "age", AggregateFn::Count), 100.0);

        // Result pages come back in ascending chunk order.
        let page = engine
            .store
            .results_for_task(group.id, 2, 3)
            .await
            .unwrap();
        let chunks: Vec<u32> = page.iter().map(|r| r.chunk_index).collect();
        assert_eq!(chunks, vec![2, 3, 4]);
    }

    // Scenario: null scores never match a filter, and an all-null
    // selection aggregates to no value.
    // Expected Outcome: survivors exclude every seventh row; a filter
    // nothing passes leaves empty ids, empty groups, count zero and
    // mean NoValue.
    #[traced_test]
    #[tokio::test]
    async fn tc06() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(dir.path(), test_settings(10));
        let dataset = seed_people(&engine, 35).await;

        let lenient = engine
            .create_run(
                dataset.id,
                vec![
                    filter("score", FilterOp::Ge, Value::Float(0.0)),
                    aggregate("score", &[AggregateFn::Mean, AggregateFn::Count]),
                ],
            )
            .await
            .unwrap();
        engine.drain_queue().await.unwrap();

        let task = task_of(
            &engine,
            lenient.run_id,
            1,
            OperationKind::Filter,
            Variant::Baseline,
        )
        .await;
        let expected: Vec<u64> = (0..35).filter(|i| i % 7 != 0).collect();
        assert_eq!(filter_ids(&task), expected);

        let mean = task_of(
            &engine,
            lenient.run_id,
            1,
            OperationKind::Aggregate,
            Variant::Baseline,
        )
        .await;
        assert_number(&aggregate_result(&mean, "score", AggregateFn::Mean), 8.75);
        assert_number(&aggregate_result(&mean, "score", AggregateFn::Count), 30.0);

        let impossible = engine
            .create_run(
                dataset.id,
                vec![
                    filter("score", FilterOp::Ge, Value::Float(1e9)),
                    group_by(&["city"]),
                    aggregate("score", &[AggregateFn::Mean, AggregateFn::Count]),
                ],
            )
            .await
            .unwrap();
        engine.drain_queue().await.unwrap();

        let task = task_of(
            &engine,
            impossible.run_id,
            1,
            OperationKind::Filter,
            Variant::Baseline,
        )
        .await;
        assert!(filter_ids(&task).is_empty());
        assert_eq!(task.metrics.output_rows, Some(0));

        let group = task_of(
            &engine,
            impossible.run_id,
            1,
            OperationKind::Group,
            Variant::Baseline,
        )
        .await;
        assert_eq!(group.metrics.input_rows, 0);
        assert_eq!(
            group.output,
            Some(TaskOutput::Groups(vec![]))
        );

        let empty = task_of(
            &engine,
            impossible.run_id,
            1,
            OperationKind::Aggregate,
            Variant::Baseline,
        )
        .await;
        assert_eq!(
            aggregate_result(&empty, "score", AggregateFn::Mean),
            AggregateValue::NoValue
        );
        assert_number(&aggregate_result(&empty, "score", AggregateFn::Count), 0.0);
    }

    // Scenario: a candidate output is nudged after the run finished,
    // then validation runs.
    // Expected Outcome: a 0.0021 difference is invalid, a 0.0019
    // difference is within tolerance; both tasks end up validated.
    #[traced_test]
    #[tokio::test]
    async fn tc07() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(dir.path(), test_settings(100));
        let dataset = seed_people(&engine, 20).await;

        for (delta, expected_valid) in [(0.0021, false), (0.0019, true)] {
            let summary = engine
                .create_run(dataset.id, vec![aggregate("age", &[AggregateFn::Mean])])
                .await
                .unwrap();
            engine.drain_queue().await.unwrap();

            let mut candidate = task_of(
                &engine,
                summary.run_id,
                1,
                OperationKind::Aggregate,
                Variant::Candidate,
            )
            .await;
            let Some(TaskOutput::Aggregates(columns)) =
                &mut candidate.output
            else {
                panic!("missing aggregate output");
            };
            let AggregateValue::Number(mean) = &mut columns[0].results[0].1 else {
                panic!("mean is not a number");
            };
            *mean += delta;
            engine.store.update_task(&candidate).await.unwrap();

            engine.enqueue_job(JobRequest::ValidateRuns).await.unwrap();
            engine.drain_queue().await.unwrap();

            let candidate = task_of(
                &engine,
                summary.run_id,
                1,
                OperationKind::Aggregate,
                Variant::Candidate,
            )
            .await;
            assert!(candidate.validated);
            assert_eq!(candidate.valid, expected_valid, "delta {delta}");

            let baseline = task_of(
                &engine,
                summary.run_id,
                1,
                OperationKind::Aggregate,
                Variant::Baseline,
            )
            .await;
            assert!(baseline.validated && baseline.valid);
        }
    }

    // Scenario: several runs are submitted concurrently against the
    // same dataset.
    // Expected Outcome: one queued job per run, and each run sees its
    // own filter threshold.
    #[traced_test]
    #[tokio::test]
    async fn tc08() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(dir.path(), test_settings(20));
        let dataset = seed_people(&engine, 50).await;

        let submissions = [10i64, 20, 30].map(|threshold| {
            let engine = engine.clone();
            let dataset_id = dataset.id;
            async move {
                engine
                    .create_run(
                        dataset_id,
                        vec![filter("age", FilterOp::Ge, Value::Int(threshold))],
                    )
                    .await
                    .unwrap()
            }
        });
        let summaries = join_all(submissions).await;
        assert_eq!(engine.store.queue_len().await.unwrap(), 3);
        engine.drain_queue().await.unwrap();

        // Ages are 0..50 here, so each threshold trims ten more rows.
        for (summary, expected) in summaries.iter().zip([40u64, 30, 20]) {
            let task = task_of(
                &engine,
                summary.run_id,
                1,
                OperationKind::Filter,
                Variant::Baseline,
            )
            .await;
            assert_eq!(task.status, TaskStatus::Completed);
            assert_eq!(task.metrics.output_rows, Some(expected));
        }
    }

    // Scenario: the dispatcher loop serves the queue in the background
    // until it is cancelled.
    // Expected Outcome: the queued run completes without an explicit
    // drain, and cancellation stops the loop promptly.
    #[tokio::test]
    async fn tc09() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(dir.path(), test_settings(10));
        let dataset = seed_people(&engine, 12).await;

        let summary = engine
            .create_run(dataset.id, vec![aggregate("age", &[AggregateFn::Sum])])
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let loop_engine = engine.clone();
        let loop_cancel = cancel.clone();
        let handle =
            tokio::spawn(async move { loop_engine.run_dispatcher(loop_cancel).await });

        let mut done = false;
        for _ in 0..500 {
            let tasks = tasks_of(&engine, summary.run_id).await;
            if !tasks.is_empty() && tasks.iter().all(|t| t.status == TaskStatus::Completed) {
                done = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(done, "dispatcher never finished the run");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("dispatcher did not stop")
            .unwrap();
    }
}
