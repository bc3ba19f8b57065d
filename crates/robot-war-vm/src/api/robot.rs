use std::{any::Any, cell::Cell, cell::RefCell, rc::Rc};

use serde::Serialize;

use super::{ApiClass, ApiObject, NativeCx, NativeError, NativeMethod, NativeReturn};
use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult},
    value::Value,
};

/// `robot_war.model0.Robot`, the agent scripts subclass to drive their robot.
#[derive(Debug, Default)]
pub struct RobotClass;

impl ApiClass for RobotClass {
    fn name(&self) -> &str {
        "Robot"
    }

    fn is_agent(&self) -> bool {
        true
    }

    fn instantiate(&self, _cx: &mut NativeCx<'_>) -> RunResult<Rc<dyn ApiObject>> {
        Ok(Rc::new(Robot::default()))
    }
}

/// A command issued by the script, drained by the game loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RobotCommand {
    TurnRight(f64),
    Forward(f64),
    Shoot(f64),
}

/// The agent object; position fields are owned by the host and read-only to scripts.
#[derive(Debug, Default)]
pub struct Robot {
    pub x: Cell<f64>,
    pub y: Cell<f64>,
    pub facing: Cell<f64>,
    commands: RefCell<Vec<RobotCommand>>,
}

impl Robot {
    /// Removes and returns the commands issued since the last drain.
    pub fn drain_commands(&self) -> Vec<RobotCommand> {
        std::mem::take(&mut *self.commands.borrow_mut())
    }

    fn command(
        this: &Rc<Self>,
        cx: &mut NativeCx<'_>,
        args: ArgValues,
        name: &str,
        make: fn(f64) -> RobotCommand,
    ) -> Result<NativeReturn, NativeError> {
        let arg = args.get_one_arg(name)?;
        let amount = match arg.as_number() {
            Some(number) => number.as_f64(),
            None => {
                return Err(ExcType::TypeError
                    .msg(format!("{name}() argument must be int or float, not {}", arg.type_name()))
                    .into())
            }
        };
        this.commands.borrow_mut().push(make(amount));
        tracing::info!(command = name, amount, "robot command");
        let writer = cx.writer();
        writer.stdout_write(format!("{name}({})", arg.py_str()).into());
        writer.stdout_push_str("\n");
        Ok(Value::None.into())
    }

    fn turn_right(this: &Rc<Self>, cx: &mut NativeCx<'_>, args: ArgValues) -> Result<NativeReturn, NativeError> {
        Self::command(this, cx, args, "turn_right", RobotCommand::TurnRight)
    }

    fn forward(this: &Rc<Self>, cx: &mut NativeCx<'_>, args: ArgValues) -> Result<NativeReturn, NativeError> {
        Self::command(this, cx, args, "forward", RobotCommand::Forward)
    }

    fn shoot(this: &Rc<Self>, cx: &mut NativeCx<'_>, args: ArgValues) -> Result<NativeReturn, NativeError> {
        Self::command(this, cx, args, "shoot", RobotCommand::Shoot)
    }
}

impl ApiObject for Robot {
    fn type_name(&self) -> &str {
        "Robot"
    }

    fn get_attr(self: Rc<Self>, name: &str) -> Option<Value> {
        Some(match name {
            "x" => Value::Float(self.x.get()),
            "y" => Value::Float(self.y.get()),
            "facing" => Value::Float(self.facing.get()),
            "turn_right" => NativeMethod::value("turn_right", self, Self::turn_right),
            "forward" => NativeMethod::value("forward", self, Self::forward),
            "shoot" => NativeMethod::value("shoot", self, Self::shoot),
            _ => return None,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
