// ABOUTME: Rollback-aware status selection for deployment messages.
// ABOUTME: Rolling back an operation reports the inverse operation's rollback variant.

use crate::provider::LinkUpdateType;
use crate::types::{InstanceStatus, LinkStatus, ResourceStatus};

// Destroying an element during a rollback is rolling back its creation;
// deploying one during a rollback is rolling back its destruction or
// update. The high-level status encodes this; precise statuses stay
// rollback-agnostic.

pub(crate) fn instance_deploying_status(rollback: bool) -> InstanceStatus {
    if rollback {
        InstanceStatus::DestroyRollingBack
    } else {
        InstanceStatus::Deploying
    }
}

pub(crate) fn instance_deployed_status(rollback: bool) -> InstanceStatus {
    if rollback {
        InstanceStatus::DestroyRollbackComplete
    } else {
        InstanceStatus::Deployed
    }
}

pub(crate) fn instance_deploy_failed_status(rollback: bool) -> InstanceStatus {
    if rollback {
        InstanceStatus::DestroyRollbackFailed
    } else {
        InstanceStatus::DeployFailed
    }
}

pub(crate) fn instance_destroying_status(rollback: bool) -> InstanceStatus {
    if rollback {
        InstanceStatus::DeployRollingBack
    } else {
        InstanceStatus::Destroying
    }
}

pub(crate) fn instance_destroyed_status(rollback: bool) -> InstanceStatus {
    if rollback {
        InstanceStatus::DeployRollbackComplete
    } else {
        InstanceStatus::Destroyed
    }
}

pub(crate) fn instance_destroy_failed_status(rollback: bool) -> InstanceStatus {
    if rollback {
        InstanceStatus::DeployRollbackFailed
    } else {
        InstanceStatus::DestroyFailed
    }
}

pub(crate) fn finished_failure_status(destroying: bool, rollback: bool) -> InstanceStatus {
    if destroying {
        instance_destroy_failed_status(rollback)
    } else {
        instance_deploy_failed_status(rollback)
    }
}

pub(crate) fn resource_destroying_status(rollback: bool) -> ResourceStatus {
    if rollback {
        ResourceStatus::CreateRollingBack
    } else {
        ResourceStatus::Destroying
    }
}

pub(crate) fn resource_destroyed_status(rollback: bool) -> ResourceStatus {
    if rollback {
        ResourceStatus::CreateRollbackComplete
    } else {
        ResourceStatus::Destroyed
    }
}

pub(crate) fn resource_destroy_failed_status(rollback: bool) -> ResourceStatus {
    if rollback {
        ResourceStatus::CreateRollbackFailed
    } else {
        ResourceStatus::DestroyFailed
    }
}

pub(crate) fn resource_deploying_status(is_new: bool, rollback: bool) -> ResourceStatus {
    match (is_new, rollback) {
        (true, false) => ResourceStatus::Creating,
        (true, true) => ResourceStatus::DestroyRollingBack,
        (false, false) => ResourceStatus::Updating,
        (false, true) => ResourceStatus::UpdateRollingBack,
    }
}

pub(crate) fn resource_deployed_status(is_new: bool, rollback: bool) -> ResourceStatus {
    match (is_new, rollback) {
        (true, false) => ResourceStatus::Created,
        (true, true) => ResourceStatus::DestroyRollbackComplete,
        (false, false) => ResourceStatus::Updated,
        (false, true) => ResourceStatus::UpdateRollbackComplete,
    }
}

pub(crate) fn resource_deploy_failed_status(is_new: bool, rollback: bool) -> ResourceStatus {
    match (is_new, rollback) {
        (true, false) => ResourceStatus::CreateFailed,
        (true, true) => ResourceStatus::DestroyRollbackFailed,
        (false, false) => ResourceStatus::UpdateFailed,
        (false, true) => ResourceStatus::UpdateRollbackFailed,
    }
}

pub(crate) fn link_updating_status(update_type: LinkUpdateType, rollback: bool) -> LinkStatus {
    match (update_type, rollback) {
        (LinkUpdateType::Create, false) => LinkStatus::Creating,
        (LinkUpdateType::Create, true) => LinkStatus::DestroyRollingBack,
        (LinkUpdateType::Update, false) => LinkStatus::Updating,
        (LinkUpdateType::Update, true) => LinkStatus::UpdateRollingBack,
        (LinkUpdateType::Destroy, false) => LinkStatus::Destroying,
        (LinkUpdateType::Destroy, true) => LinkStatus::CreateRollingBack,
    }
}

pub(crate) fn link_updated_status(update_type: LinkUpdateType, rollback: bool) -> LinkStatus {
    match (update_type, rollback) {
        (LinkUpdateType::Create, false) => LinkStatus::Created,
        (LinkUpdateType::Create, true) => LinkStatus::DestroyRollbackComplete,
        (LinkUpdateType::Update, false) => LinkStatus::Updated,
        (LinkUpdateType::Update, true) => LinkStatus::UpdateRollbackComplete,
        (LinkUpdateType::Destroy, false) => LinkStatus::Destroyed,
        (LinkUpdateType::Destroy, true) => LinkStatus::CreateRollbackComplete,
    }
}

pub(crate) fn link_update_failed_status(
    update_type: LinkUpdateType,
    rollback: bool,
) -> LinkStatus {
    match (update_type, rollback) {
        (LinkUpdateType::Create, false) => LinkStatus::CreateFailed,
        (LinkUpdateType::Create, true) => LinkStatus::DestroyRollbackFailed,
        (LinkUpdateType::Update, false) => LinkStatus::UpdateFailed,
        (LinkUpdateType::Update, true) => LinkStatus::UpdateRollbackFailed,
        (LinkUpdateType::Destroy, false) => LinkStatus::DestroyFailed,
        (LinkUpdateType::Destroy, true) => LinkStatus::CreateRollbackFailed,
    }
}

pub(crate) fn child_destroying_status(rollback: bool) -> InstanceStatus {
    if rollback {
        InstanceStatus::DeployRollingBack
    } else {
        InstanceStatus::Destroying
    }
}

pub(crate) fn child_destroyed_status(rollback: bool) -> InstanceStatus {
    if rollback {
        InstanceStatus::DeployRollbackComplete
    } else {
        InstanceStatus::Destroyed
    }
}

pub(crate) fn child_destroy_failed_status(rollback: bool) -> InstanceStatus {
    if rollback {
        InstanceStatus::DeployRollbackFailed
    } else {
        InstanceStatus::DestroyFailed
    }
}

pub(crate) fn child_deploying_status(rollback: bool) -> InstanceStatus {
    if rollback {
        InstanceStatus::DestroyRollingBack
    } else {
        InstanceStatus::Deploying
    }
}

pub(crate) fn child_deployed_status(rollback: bool) -> InstanceStatus {
    if rollback {
        InstanceStatus::DestroyRollbackComplete
    } else {
        InstanceStatus::Deployed
    }
}

pub(crate) fn child_deploy_failed_status(rollback: bool) -> InstanceStatus {
    if rollback {
        InstanceStatus::DestroyRollbackFailed
    } else {
        InstanceStatus::DeployFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destroy_under_rollback_reports_create_rollback() {
        assert_eq!(
            resource_destroying_status(true),
            ResourceStatus::CreateRollingBack
        );
        assert_eq!(
            resource_destroyed_status(true),
            ResourceStatus::CreateRollbackComplete
        );
        assert_eq!(resource_destroying_status(false), ResourceStatus::Destroying);
    }

    #[test]
    fn link_destroy_statuses_follow_update_type() {
        assert_eq!(
            link_updating_status(LinkUpdateType::Destroy, false),
            LinkStatus::Destroying
        );
        assert_eq!(
            link_updated_status(LinkUpdateType::Create, true),
            LinkStatus::DestroyRollbackComplete
        );
    }
}
