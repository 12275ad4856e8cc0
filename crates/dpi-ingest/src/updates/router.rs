//! Classification and ordering of update actions
//!
//! Every incoming field update maps to exactly one [`UpdateAction`]. The
//! mapping is a pure match over the closed update-type set, so adding a new
//! update type is a compile error until it is routed here.

use dpi_common::types::{FieldUpdate, UpdateType, STATUS_DELETED, STATUS_PUBLISHED};
use dpi_common::{IngestError, Result};

/// What to do to the pipeline cache for one field update.
///
/// The variant order is the execution order within one document's update
/// batch: restore first (nothing is lost by bringing archived state back),
/// in-place mutation second (it must see the live record), relocation to
/// the archive last. Mutating a record after it has been archived away is
/// a lost update, so this ordering is a correctness requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UpdateAction {
    RestoreFromArchive,
    UpdateInPlace,
    ReprocessFromSource,
}

/// Map one field update to its action.
///
/// Total and deterministic over the supported update types; an
/// unrecognized document status value is an explicit error, never a
/// silent no-op.
pub fn classify(update: &FieldUpdate) -> Result<UpdateAction> {
    match update.update_type {
        UpdateType::SourceUrl | UpdateType::Reprocess => Ok(UpdateAction::ReprocessFromSource),
        UpdateType::Name
        | UpdateType::Description
        | UpdateType::Metadata
        | UpdateType::Slug => Ok(UpdateAction::UpdateInPlace),
        UpdateType::DocumentStatus => match update.new_value.as_str() {
            Some(STATUS_DELETED) => Ok(UpdateAction::ReprocessFromSource),
            Some(STATUS_PUBLISHED) => Ok(UpdateAction::RestoreFromArchive),
            other => Err(IngestError::UnsupportedUpdateField(format!(
                "document status value {:?} has no routing",
                other
            ))),
        },
    }
}

/// Order one document's routed updates for safe application.
///
/// Stable sort on the action priority, so updates with the same action
/// keep their input order.
pub fn order_actions(
    mut routed: Vec<(FieldUpdate, UpdateAction)>,
) -> Vec<(FieldUpdate, UpdateAction)> {
    routed.sort_by_key(|(_, action)| *action);
    routed
}
