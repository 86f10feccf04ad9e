use crate::{
    error::StoreError,
    store::{DatasetStore, JobQueue, ResultStore, TaskFilter, TaskStore, keys},
};
use async_trait::async_trait;
use model::{
    core::identifiers::{DatasetId, JobId, TaskId},
    execution::{
        job::{Job, JobRequest},
        output::BatchResult,
        task::Task,
    },
    records::{
        dataset::Dataset,
        row::{FieldValue, Row},
    },
};
use std::path::Path;

/// Embedded store backing the whole engine: datasets, rows, tasks,
/// per-chunk results and the job queue each live in their own named
/// tree of a single sled database, with bincode-encoded values.
pub struct SledStore {
    db: sled::Db,
    datasets: sled::Tree,
    records: sled::Tree,
    tasks: sled::Tree,
    results: sled::Tree,
    jobs: sled::Tree,
    meta: sled::Tree,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self {
            datasets: db.open_tree("datasets")?,
            records: db.open_tree("records")?,
            tasks: db.open_tree("tasks")?,
            results: db.open_tree("results")?,
            jobs: db.open_tree("jobs")?,
            meta: db.open_tree("meta")?,
            db,
        })
    }

    /// Blocks until everything written so far is on disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

#[async_trait]
impl DatasetStore for SledStore {
    async fn insert_dataset(&self, dataset: &Dataset) -> Result<(), StoreError> {
        let value = bincode::serialize(dataset)?;
        self.datasets.insert(dataset.id.as_bytes(), value)?;
        Ok(())
    }

    async fn get_dataset(&self, id: DatasetId) -> Result<Option<Dataset>, StoreError> {
        match self.datasets.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn find_dataset_by_name(&self, name: &str) -> Result<Option<Dataset>, StoreError> {
        for item in self.datasets.iter() {
            let (_, bytes) = item?;
            let dataset: Dataset = bincode::deserialize(&bytes)?;
            if dataset.name == name {
                return Ok(Some(dataset));
            }
        }
        Ok(None)
    }

    async fn list_datasets(&self) -> Result<Vec<Dataset>, StoreError> {
        let mut datasets = Vec::new();
        for item in self.datasets.iter() {
            let (_, bytes) = item?;
            datasets.push(bincode::deserialize(&bytes)?);
        }
        Ok(datasets)
    }

    async fn update_dataset(&self, dataset: &Dataset) -> Result<(), StoreError> {
        self.insert_dataset(dataset).await
    }

    async fn delete_dataset(&self, id: DatasetId) -> Result<(), StoreError> {
        self.datasets.remove(id.as_bytes())?;
        Ok(())
    }

    async fn insert_rows(
        &self,
        id: DatasetId,
        rows: Vec<Vec<FieldValue>>,
    ) -> Result<u64, StoreError> {
        let n = rows.len() as u64;
        // Reserve the id range atomically, then write the rows.
        let after = self
            .meta
            .update_and_fetch(keys::row_counter_key(id), |old| {
                let current = old.map(keys::decode_u64).unwrap_or(0);
                Some(keys::encode_u64(current.saturating_add(n)).to_vec())
            })?;
        let end = after.as_deref().map(keys::decode_u64).unwrap_or(n);
        let base = end.checked_sub(n).ok_or(StoreError::RowCounterOverflow)?;

        for (offset, fields) in rows.into_iter().enumerate() {
            let row = Row::new(base + offset as u64, fields);
            let value = bincode::serialize(&row)?;
            self.records.insert(keys::record_key(id, row.id), value)?;
        }
        Ok(n)
    }

    async fn page_rows(
        &self,
        id: DatasetId,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Row>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let start = keys::record_key(id, skip);
        let mut rows = Vec::new();
        for item in self.records.range(start.to_vec()..) {
            let (key, value) = item?;
            if !key.starts_with(id.as_bytes()) {
                break;
            }
            rows.push(bincode::deserialize(&value)?);
            if rows.len() as u64 >= limit {
                break;
            }
        }
        Ok(rows)
    }

    async fn count_rows(&self, id: DatasetId) -> Result<u64, StoreError> {
        let mut count = 0u64;
        for item in self.records.scan_prefix(id.as_bytes()) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    async fn delete_rows(&self, id: DatasetId) -> Result<u64, StoreError> {
        let mut row_keys = Vec::new();
        for item in self.records.scan_prefix(id.as_bytes()) {
            let (key, _) = item?;
            row_keys.push(key);
        }
        for key in &row_keys {
            self.records.remove(key)?;
        }
        // Next ingestion starts numbering at zero again.
        self.meta.remove(keys::row_counter_key(id))?;
        Ok(row_keys.len() as u64)
    }
}

#[async_trait]
impl TaskStore for SledStore {
    async fn insert_task(&self, task: &Task) -> Result<(), StoreError> {
        let value = bincode::serialize(task)?;
        self.tasks.insert(task.id.as_bytes(), value)?;
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        match self.tasks.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn update_task(&self, task: &Task) -> Result<(), StoreError> {
        self.insert_task(task).await
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let mut tasks = Vec::new();
        for item in self.tasks.iter() {
            let (_, bytes) = item?;
            let task: Task = bincode::deserialize(&bytes)?;
            if filter.matches(&task) {
                tasks.push(task);
            }
        }
        tasks.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(tasks)
    }

    async fn delete_tasks_for_dataset(&self, id: DatasetId) -> Result<u64, StoreError> {
        let mut victims = Vec::new();
        for item in self.tasks.iter() {
            let (key, bytes) = item?;
            let task: Task = bincode::deserialize(&bytes)?;
            if task.dataset_id == id {
                victims.push(key);
            }
        }
        for key in &victims {
            self.tasks.remove(key)?;
        }
        Ok(victims.len() as u64)
    }
}

#[async_trait]
impl ResultStore for SledStore {
    async fn append_result(&self, result: &BatchResult) -> Result<(), StoreError> {
        let key = keys::result_key(result.task_id, result.chunk_index);
        let value = bincode::serialize(result)?;
        self.results
            .compare_and_swap(key, None as Option<&[u8]>, Some(value))?
            .map_err(|_| StoreError::DuplicateResult {
                task: result.task_id,
                chunk: result.chunk_index,
            })
    }

    async fn results_for_task(
        &self,
        task: TaskId,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<BatchResult>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for item in self.results.scan_prefix(task.as_bytes()).skip(skip as usize) {
            let (_, value) = item?;
            results.push(bincode::deserialize(&value)?);
            if results.len() as u64 >= limit {
                break;
            }
        }
        Ok(results)
    }

    async fn delete_results_for_task(&self, task: TaskId) -> Result<u64, StoreError> {
        let mut victims = Vec::new();
        for item in self.results.scan_prefix(task.as_bytes()) {
            let (key, _) = item?;
            victims.push(key);
        }
        for key in &victims {
            self.results.remove(key)?;
        }
        Ok(victims.len() as u64)
    }
}

#[async_trait]
impl JobQueue for SledStore {
    async fn enqueue(&self, request: JobRequest) -> Result<JobId, StoreError> {
        let id = JobId(self.db.generate_id()?);
        let value = bincode::serialize(&request)?;
        self.jobs.insert(keys::encode_u64(id.0), value)?;
        Ok(id)
    }

    async fn claim_next(&self) -> Result<Option<Job>, StoreError> {
        match self.jobs.pop_min()? {
            Some((key, value)) => {
                let request: JobRequest = bincode::deserialize(&value)?;
                Ok(Some(Job {
                    id: JobId(keys::decode_u64(&key)),
                    request,
                }))
            }
            None => Ok(None),
        }
    }

    async fn queue_len(&self) -> Result<usize, StoreError> {
        Ok(self.jobs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use model::{
        core::{
            column::{ColumnDef, ColumnType, Schema},
            identifiers::RunId,
            value::Value,
        },
        execution::{
            operation::{FilterOp, OperationKind, OperationSpec, Predicate, Trigger, Variant},
            output::BatchContent,
            task::{NewTask, TaskStatus},
        },
    };
    use tempfile::tempdir;

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnDef::new("age", ColumnType::Number),
            ColumnDef::new("city", ColumnType::String),
        ])
    }

    fn fields(age: i64) -> Vec<FieldValue> {
        vec![
            FieldValue::new("age", Value::Int(age)),
            FieldValue::new("city", Value::String("Oslo".into())),
        ]
    }

    fn mk_task(dataset: DatasetId, run: RunId, variant: Variant) -> Task {
        Task::new(NewTask {
            run_id: run,
            dataset_id: dataset,
            dataset_version: 1,
            variant,
            trigger: Trigger::User,
            iteration: 1,
            actions: vec![OperationKind::Filter],
            spec: OperationSpec::Filter {
                predicates: vec![Predicate::new("age", FilterOp::Ge, Value::Int(18))],
            },
        })
        .unwrap()
    }

    fn mk_result(task: TaskId, run: RunId, chunk: u32) -> BatchResult {
        BatchResult {
            task_id: task,
            run_id: run,
            chunk_index: chunk,
            input_rows: 10,
            output_rows: Some(5),
            samples: Vec::new(),
            content: BatchContent::FilterIds(vec![1, 2, 3]),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn dataset_roundtrip_and_lookup_by_name() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        let dataset = Dataset::new("people", schema(), 0);
        store.insert_dataset(&dataset).await.unwrap();

        let by_id = store.get_dataset(dataset.id).await.unwrap().unwrap();
        assert_eq!(by_id.name, "people");

        let by_name = store.find_dataset_by_name("people").await.unwrap().unwrap();
        assert_eq!(by_name.id, dataset.id);
        assert!(store.find_dataset_by_name("nobody").await.unwrap().is_none());

        store.delete_dataset(dataset.id).await.unwrap();
        assert!(store.get_dataset(dataset.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rows_get_ascending_ids_and_ordered_pages() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        let id = DatasetId::new();

        let inserted = store
            .insert_rows(id, (0..300).map(|i| fields(i)).collect())
            .await
            .unwrap();
        assert_eq!(inserted, 300);
        assert_eq!(store.count_rows(id).await.unwrap(), 300);

        let page = store.page_rows(id, 250, 100).await.unwrap();
        assert_eq!(page.len(), 50);
        assert_eq!(page[0].id, 250);
        assert_eq!(page.last().unwrap().id, 299);

        // Ordering must hold across the u8 boundary of the id encoding.
        let around = store.page_rows(id, 255, 3).await.unwrap();
        let ids: Vec<u64> = around.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![255, 256, 257]);

        assert!(store.page_rows(id, 300, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reingestion_after_delete_starts_at_zero() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        let id = DatasetId::new();

        store
            .insert_rows(id, (0..5).map(|i| fields(i)).collect())
            .await
            .unwrap();
        assert_eq!(store.delete_rows(id).await.unwrap(), 5);
        assert_eq!(store.count_rows(id).await.unwrap(), 0);

        store.insert_rows(id, vec![fields(1)]).await.unwrap();
        let page = store.page_rows(id, 0, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, 0);
    }

    #[tokio::test]
    async fn rows_of_other_datasets_stay_invisible() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        let a = DatasetId::new();
        let b = DatasetId::new();

        store.insert_rows(a, vec![fields(1), fields(2)]).await.unwrap();
        store.insert_rows(b, vec![fields(3)]).await.unwrap();

        assert_eq!(store.count_rows(a).await.unwrap(), 2);
        assert_eq!(store.count_rows(b).await.unwrap(), 1);
        assert_eq!(store.page_rows(b, 0, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn task_filters_compose() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        let dataset = DatasetId::new();
        let run = RunId::new();

        let t1 = mk_task(dataset, run, Variant::Baseline);
        let t2 = mk_task(dataset, run, Variant::Candidate);
        let other = mk_task(DatasetId::new(), RunId::new(), Variant::Baseline);
        store.insert_task(&t1).await.unwrap();
        store.insert_task(&t2).await.unwrap();
        store.insert_task(&other).await.unwrap();

        let for_run = store
            .list_tasks(&TaskFilter::all().run(run))
            .await
            .unwrap();
        assert_eq!(for_run.len(), 2);

        let pending = store
            .list_tasks(&TaskFilter::all().dataset(dataset).status(TaskStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 2);

        let mut done = t1.clone();
        done.status = TaskStatus::Completed;
        store.update_task(&done).await.unwrap();
        let pending = store
            .list_tasks(&TaskFilter::all().dataset(dataset).status(TaskStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, t2.id);

        assert_eq!(store.delete_tasks_for_dataset(dataset).await.unwrap(), 2);
        assert!(store.get_task(t1.id).await.unwrap().is_none());
        assert!(store.get_task(other.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn batch_results_are_write_once_and_chunk_ordered() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        let task = TaskId::new();
        let run = RunId::new();

        for chunk in [2u32, 0, 1] {
            store.append_result(&mk_result(task, run, chunk)).await.unwrap();
        }
        let dup = store.append_result(&mk_result(task, run, 1)).await;
        assert!(matches!(
            dup,
            Err(StoreError::DuplicateResult { chunk: 1, .. })
        ));

        let all = store.results_for_task(task, 0, 100).await.unwrap();
        let chunks: Vec<u32> = all.iter().map(|r| r.chunk_index).collect();
        assert_eq!(chunks, vec![0, 1, 2]);

        let tail = store.results_for_task(task, 2, 100).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].chunk_index, 2);

        assert_eq!(store.delete_results_for_task(task).await.unwrap(), 3);
        assert!(store.results_for_task(task, 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn job_queue_is_fifo_and_claims_remove() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        let dataset = DatasetId::new();

        store.enqueue(JobRequest::ValidateRuns).await.unwrap();
        store
            .enqueue(JobRequest::ResetRuns { dataset_id: dataset })
            .await
            .unwrap();
        assert_eq!(store.queue_len().await.unwrap(), 2);

        let first = store.claim_next().await.unwrap().unwrap();
        assert_eq!(first.request, JobRequest::ValidateRuns);
        let second = store.claim_next().await.unwrap().unwrap();
        assert_eq!(
            second.request,
            JobRequest::ResetRuns { dataset_id: dataset }
        );
        assert!(first.id < second.id);
        assert!(store.claim_next().await.unwrap().is_none());
        assert_eq!(store.queue_len().await.unwrap(), 0);
    }
}
