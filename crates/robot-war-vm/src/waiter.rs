use std::{cell::RefCell, rc::Rc};

use crate::{
    api::{NativeCx, NativeError, NativeReturn},
    playground::SandboxId,
    value::Value,
};

/// One-shot rendezvous: sandboxes park on it until a value is published.
///
/// Clones share state, so the publishing side and the waiting side can hold separate handles.
/// Host natives use it the way `thread.Thread` does: return [`Waiter::get_value`] from the
/// blocking call and publish with [`Waiter::set_value`] from whichever native finishes the work.
#[derive(Debug, Clone, Default)]
pub struct Waiter {
    state: Rc<RefCell<WaiterState>>,
}

#[derive(Debug, Default)]
struct WaiterState {
    value: Option<Value>,
    parked: Vec<SandboxId>,
}

impl Waiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes the value and wakes every parked sandbox with it.
    pub fn set_value(&self, cx: &mut NativeCx<'_>, value: Value) {
        let parked = {
            let mut state = self.state.borrow_mut();
            state.value = Some(value.clone());
            std::mem::take(&mut state.parked)
        };
        for sandbox in parked {
            cx.wake(sandbox, value.clone());
        }
    }

    /// The published value, or parks the calling sandbox until there is one.
    pub fn get_value(&self, cx: &NativeCx<'_>) -> Result<NativeReturn, NativeError> {
        let mut state = self.state.borrow_mut();
        Ok(match &state.value {
            Some(value) => NativeReturn::Value(value.clone()),
            None => {
                state.parked.push(cx.sandbox()?);
                NativeReturn::Park
            }
        })
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state.borrow().value.is_some()
    }

    /// Sandboxes currently parked on this waiter.
    #[must_use]
    pub fn parked(&self) -> Vec<SandboxId> {
        self.state.borrow().parked.clone()
    }
}
