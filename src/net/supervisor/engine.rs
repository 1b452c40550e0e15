use statig::blocking::IntoStateMachineExt as _;

use super::machine::{DispatchContext, LinkApplyStatus, LinkEvent, LinkMachine};
use crate::net::types::LinkState;

#[derive(Clone, Copy, Debug)]
pub(crate) struct LinkApplyResult {
    pub(crate) before: LinkState,
    pub(crate) after: LinkState,
    pub(crate) status: LinkApplyStatus,
}

impl LinkApplyResult {
    pub(crate) fn changed(self) -> bool {
        matches!(self.status, LinkApplyStatus::Applied) && self.before != self.after
    }

    pub(crate) fn entered_provisioning(self) -> bool {
        self.changed() && matches!(self.after, LinkState::ProvisioningActive)
    }
}

pub(crate) struct LinkEngine {
    machine: statig::blocking::StateMachine<LinkMachine>,
}

impl LinkEngine {
    pub(crate) fn new() -> Self {
        Self {
            machine: LinkMachine::new().state_machine(),
        }
    }

    pub(crate) fn link_state(&self) -> LinkState {
        self.machine.inner().link_state
    }

    pub(crate) fn apply(&mut self, event: LinkEvent) -> LinkApplyResult {
        let before = self.link_state();
        let mut context = DispatchContext::default();
        self.machine.handle_with_context(&event, &mut context);
        let after = self.link_state();
        LinkApplyResult {
            before,
            after,
            status: context.status,
        }
    }
}
