//! Worker Dispatch
//! 
//! Timing callbacks are never run on the tick path. The scheduler asks a
//! [`WorkerDispatch`] which worker a job type belongs to and hands the job
//! over; [`WorkerPool`] is the tokio-backed implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::InterfaceError;

/// Kind of scheduled job, used to pick a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    /// DL C-Plane generation
    CpDl,
    /// UL C-Plane generation
    CpUl,
    /// Reception deadline processing
    Deadline,
    /// User symbol callback
    SymCb,
}

impl JobType {
    fn index(&self) -> usize {
        match self {
            JobType::CpDl => 0,
            JobType::CpUl => 1,
            JobType::Deadline => 2,
            JobType::SymCb => 3,
        }
    }
}

/// A unit of work handed to a worker
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Hands scheduled jobs to workers
pub trait WorkerDispatch: Send + Sync {
    /// Pick the worker responsible for `job_type`
    fn schedule_to_worker(&self, job_type: JobType) -> usize;

    /// Queue `job` on `worker` without running it
    fn dispatch(&self, worker: usize, job: Job) -> Result<(), InterfaceError>;
}

/// Pool of tokio tasks, one unbounded queue each
///
/// Every job type is pinned to one worker so jobs of the same type run in
/// the order they were dispatched.
pub struct WorkerPool {
    senders: Vec<mpsc::UnboundedSender<Job>>,
    handles: Vec<JoinHandle<()>>,
    dispatched: AtomicU64,
}

impl WorkerPool {
    /// Spawn `num_workers` workers on the current tokio runtime
    pub fn spawn(num_workers: usize) -> Result<Self, InterfaceError> {
        if num_workers == 0 {
            return Err(InterfaceError::InvalidConfig("worker pool needs at least one worker".to_string()));
        }

        let mut senders = Vec::with_capacity(num_workers);
        let mut handles = Vec::with_capacity(num_workers);
        for worker in 0..num_workers {
            let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
            handles.push(tokio::spawn(async move {
                debug!("Worker {} started", worker);
                while let Some(job) = rx.recv().await {
                    job();
                }
                debug!("Worker {} stopped", worker);
            }));
            senders.push(tx);
        }

        info!("Worker pool started with {} workers", num_workers);
        Ok(Self {
            senders,
            handles,
            dispatched: AtomicU64::new(0),
        })
    }

    /// Number of workers
    pub fn num_workers(&self) -> usize {
        self.senders.len()
    }

    /// Jobs dispatched so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Close every queue and wait for queued jobs to finish
    pub async fn shutdown(self) {
        drop(self.senders);
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("Worker task ended abnormally: {}", e);
            }
        }
        info!("Worker pool stopped");
    }
}

impl WorkerDispatch for WorkerPool {
    fn schedule_to_worker(&self, job_type: JobType) -> usize {
        job_type.index() % self.senders.len()
    }

    fn dispatch(&self, worker: usize, job: Job) -> Result<(), InterfaceError> {
        let sender = self
            .senders
            .get(worker)
            .ok_or(InterfaceError::WorkerUnavailable(worker))?;
        sender
            .send(job)
            .map_err(|_| InterfaceError::WorkerUnavailable(worker))?;
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    
    #[tokio::test]
    async fn test_pool_runs_jobs() {
        let pool = WorkerPool::spawn(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            let worker = pool.schedule_to_worker(JobType::CpDl);
            pool.dispatch(worker, Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })).unwrap();
        }
        assert_eq!(pool.dispatched(), 10);
        
        pool.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
    
    #[tokio::test]
    async fn test_job_type_affinity() {
        let pool = WorkerPool::spawn(2).unwrap();
        assert_eq!(pool.schedule_to_worker(JobType::CpDl), 0);
        assert_eq!(pool.schedule_to_worker(JobType::CpUl), 1);
        assert_eq!(pool.schedule_to_worker(JobType::Deadline), 0);
        assert!(matches!(
            pool.dispatch(5, Box::new(|| {})),
            Err(InterfaceError::WorkerUnavailable(5))
        ));
        pool.shutdown().await;
    }
    
    #[tokio::test]
    async fn test_same_type_keeps_order() {
        let pool = WorkerPool::spawn(4).unwrap();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..20 {
            let order = Arc::clone(&order);
            let worker = pool.schedule_to_worker(JobType::Deadline);
            pool.dispatch(worker, Box::new(move || order.lock().unwrap().push(i))).unwrap();
        }
        pool.shutdown().await;
        assert_eq!(*order.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }
    
    #[test]
    fn test_empty_pool_rejected() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        assert!(WorkerPool::spawn(0).is_err());
    }
}
