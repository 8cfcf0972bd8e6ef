use thiserror::Error;

use crate::model::MergeError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum MergerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("schema drift while merging snapshots: {0}")]
    Incompatible(#[from] MergeError),
}
