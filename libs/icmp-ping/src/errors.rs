use crate::ProbeId;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error: {0:?}")]
    IoError(#[from] std::io::Error),
    /// the correlation map is at capacity; callers treat this as
    /// "no conflict observed" and move on
    #[error("probe queue full (capacity {capacity})")]
    QueueFull { capacity: usize },
    #[error("recv error on probe {id:?}")]
    RecvError {
        id: ProbeId,
        #[source]
        err: tokio::sync::oneshot::error::RecvError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
