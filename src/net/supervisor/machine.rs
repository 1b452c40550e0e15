use statig::prelude::*;

use crate::net::types::LinkState;

/// Connectivity lifecycle events, raised by the supervisor loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LinkEvent {
    CredentialsLoaded,
    CredentialsUnavailable,
    LinkUp,
    LinkLost,
    RetriesExhausted,
    CredentialsSaved,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LinkApplyStatus {
    Applied,
    InvalidTransition,
}

#[derive(Clone, Copy, Debug)]
pub(super) struct LinkMachine {
    pub(super) link_state: LinkState,
}

#[derive(Clone, Copy, Debug)]
pub(super) struct DispatchContext {
    pub(super) status: LinkApplyStatus,
}

impl Default for DispatchContext {
    fn default() -> Self {
        Self {
            status: LinkApplyStatus::InvalidTransition,
        }
    }
}

impl LinkMachine {
    pub(super) fn new() -> Self {
        Self {
            link_state: LinkState::Uninitialized,
        }
    }

    fn enter(&mut self, context: &mut DispatchContext, next: LinkState) {
        self.link_state = next;
        context.status = LinkApplyStatus::Applied;
    }
}

#[state_machine(initial = "State::uninitialized()")]
impl LinkMachine {
    #[state]
    fn uninitialized(
        &mut self,
        context: &mut DispatchContext,
        event: &LinkEvent,
    ) -> Outcome<State> {
        match event {
            LinkEvent::CredentialsLoaded => {
                self.enter(context, LinkState::Connecting);
                Transition(State::connecting())
            }
            LinkEvent::CredentialsUnavailable => {
                self.enter(context, LinkState::ProvisioningActive);
                Transition(State::provisioning())
            }
            _ => Handled,
        }
    }

    #[state]
    fn connecting(&mut self, context: &mut DispatchContext, event: &LinkEvent) -> Outcome<State> {
        match event {
            LinkEvent::LinkUp => {
                self.enter(context, LinkState::Connected);
                Transition(State::connected())
            }
            LinkEvent::RetriesExhausted | LinkEvent::CredentialsUnavailable => {
                self.enter(context, LinkState::ProvisioningActive);
                Transition(State::provisioning())
            }
            _ => Handled,
        }
    }

    #[state]
    fn connected(&mut self, context: &mut DispatchContext, event: &LinkEvent) -> Outcome<State> {
        match event {
            LinkEvent::LinkLost => {
                self.enter(context, LinkState::Connecting);
                Transition(State::connecting())
            }
            _ => Handled,
        }
    }

    #[state]
    fn provisioning(&mut self, context: &mut DispatchContext, event: &LinkEvent) -> Outcome<State> {
        match event {
            LinkEvent::CredentialsSaved => {
                self.enter(context, LinkState::Connecting);
                Transition(State::connecting())
            }
            _ => Handled,
        }
    }
}
