use std::time::Duration;

use log::*;
use tokio::sync::mpsc;

use super::{CommissionJob, JobQueue, JobQueueError};

/// Creates an in-process job channel. The queue half is `Clone` and can be handed to every producer; the receiver
/// goes to the [`super::JobRunner`].
pub fn job_channel(buffer_size: usize) -> (InProcessJobQueue, mpsc::Receiver<CommissionJob>) {
    let (sender, receiver) = mpsc::channel(buffer_size);
    (InProcessJobQueue { sender }, receiver)
}

/// A [`JobQueue`] over a tokio mpsc channel. Deferred jobs are parked on a timer task and re-sent when it fires, so
/// a delayed job survives only as long as the process does.
#[derive(Clone)]
pub struct InProcessJobQueue {
    sender: mpsc::Sender<CommissionJob>,
}

impl JobQueue for InProcessJobQueue {
    async fn enqueue(&self, job: CommissionJob) -> Result<(), JobQueueError> {
        self.sender.send(job).await.map_err(|_| JobQueueError::Closed)
    }

    async fn enqueue_after(&self, job: CommissionJob, delay: Duration) -> Result<(), JobQueueError> {
        if delay.is_zero() {
            return self.enqueue(job).await;
        }
        if self.sender.is_closed() {
            return Err(JobQueueError::Closed);
        }
        let sender = self.sender.clone();
        let label = job.describe();
        trace!("📬️ Parking a job for {}s: {label}", delay.as_secs());
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if sender.send(job).await.is_err() {
                error!("📬️ The job queue closed before a deferred job could be delivered: {label}");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn deferred_jobs_arrive_after_immediate_ones() {
        let _ = env_logger::try_init();
        let (queue, mut listener) = job_channel(8);
        let deferred = CommissionJob::BuildMonth {
            influencer_id: 1,
            month: "2024-03".parse().unwrap(),
            preview: false,
        };
        queue.enqueue_after(deferred.clone(), Duration::from_millis(50)).await.unwrap();
        queue.enqueue(CommissionJob::Shutdown).await.unwrap();
        assert_eq!(listener.recv().await, Some(CommissionJob::Shutdown));
        assert_eq!(listener.recv().await, Some(deferred));
    }

    #[tokio::test]
    async fn zero_delay_is_an_immediate_enqueue() {
        let (queue, mut listener) = job_channel(8);
        queue.enqueue_after(CommissionJob::Shutdown, Duration::ZERO).await.unwrap();
        assert_eq!(listener.recv().await, Some(CommissionJob::Shutdown));
    }

    #[tokio::test]
    async fn closed_queue_reports_the_error() {
        let (queue, listener) = job_channel(8);
        drop(listener);
        let err = queue.enqueue(CommissionJob::Shutdown).await.unwrap_err();
        assert_eq!(err, JobQueueError::Closed);
    }
}
