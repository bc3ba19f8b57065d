use std::{rc::Rc, task::Poll, time::Duration};

use super::{NativeCx, NativeError, NativeReturn, Resumable};
use crate::{
    args::ArgValues,
    clock::Clock,
    exception_private::ExcType,
    value::Value,
};

/// `time.monotonic()`: seconds on the playground clock.
pub(super) fn monotonic(cx: &mut NativeCx<'_>, args: ArgValues) -> Result<NativeReturn, NativeError> {
    args.check_zero_args("monotonic")?;
    Ok(Value::Float(cx.now().as_secs_f64()).into())
}

/// `time.sleep(seconds)`: blocks the calling sandbox as a worker until the deadline passes.
pub(super) fn sleep(cx: &mut NativeCx<'_>, args: ArgValues) -> Result<NativeReturn, NativeError> {
    let seconds = match args.get_one_arg("sleep")?.as_number() {
        Some(number) => number.as_f64(),
        None => return Err(ExcType::TypeError.msg("sleep() argument must be a number").into()),
    };
    if seconds.is_nan() || seconds < 0.0 {
        return Err(ExcType::ValueError.msg("sleep length must be non-negative").into());
    }
    let delay = Duration::try_from_secs_f64(seconds)
        .map_err(|_| NativeError::from(ExcType::overflow()))?;
    let clock = cx.clock();
    let wake_at = clock.now() + delay;
    Ok(NativeReturn::Block(Box::new(Sleep { wake_at, clock })))
}

/// Worker that completes once the clock reaches `wake_at`.
#[derive(Debug)]
pub struct Sleep {
    wake_at: Duration,
    clock: Rc<dyn Clock>,
}

impl Resumable for Sleep {
    fn resume(&mut self) -> Poll<Value> {
        if self.clock.now() >= self.wake_at {
            Poll::Ready(Value::None)
        } else {
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedStepClock;

    #[test]
    fn sleep_completes_at_deadline() {
        let clock: Rc<dyn Clock> = Rc::new(FixedStepClock::new(Duration::from_millis(10)));
        let mut sleep = Sleep {
            wake_at: clock.now() + Duration::from_millis(20),
            clock: clock.clone(),
        };
        assert!(sleep.resume().is_pending());
        clock.tick();
        assert!(sleep.resume().is_pending());
        clock.tick();
        assert!(sleep.resume().is_ready());
    }
}
