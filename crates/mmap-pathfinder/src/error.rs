/// Error types for path planning
///
/// Planning itself never fails; unreachable or unmapped destinations are
/// reported through [`crate::PathType`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerError {
    #[error("no navigation mesh loaded for map {map_id}")]
    NoQueryHandle { map_id: u32 },
}
