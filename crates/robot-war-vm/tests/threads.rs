mod common;

use std::rc::Rc;

use common::{Scripts, TICK_MS};
use robot_war_vm::{ArgValues, NativeCx, NativeError, NativeMethod, NativeReturn, SandboxOutcome, Value, Waiter};

/// Worker body shared by the thread tests:
///
/// def worker(name, delay):
///     time.sleep(delay)
///     print('done', name)
///     return name + '!'
const WORKER: &str = "
code worker params=name,delay name=worker
  3     0 LOAD_GLOBAL 0 (time)
        2 LOAD_METHOD 1 (sleep)
        4 LOAD_FAST 1 (delay)
        6 CALL_METHOD 1
        8 POP_TOP
  4    10 LOAD_GLOBAL 2 (print)
       12 LOAD_CONST 0 ('done')
       14 LOAD_FAST 0 (name)
       16 CALL_FUNCTION 2
       18 POP_TOP
  5    20 LOAD_FAST 0 (name)
       22 LOAD_CONST 1 ('!')
       24 BINARY_ADD
       26 RETURN_VALUE
";

#[test]
fn threads_finish_in_deadline_order_and_join_returns_results() {
    // t1 = thread.Thread(); t2 = thread.Thread()
    // t1.start(worker, 'one', 0.05); t2.start(worker, 'two', 0.01)
    // print(t1.join(), t2.join())
    let scripts = Scripts::new();
    let main = format!(
        "
code <module>
        0 LOAD_CONST 0 (0)
        2 LOAD_CONST 1 (None)
        4 IMPORT_NAME 0 (thread)
        6 STORE_NAME 0 (thread)
        8 LOAD_CONST 0 (0)
       10 LOAD_CONST 1 (None)
       12 IMPORT_NAME 1 (time)
       14 STORE_NAME 1 (time)
       16 LOAD_CONST 2 (<code worker>)
       18 LOAD_CONST 3 ('worker')
       20 MAKE_FUNCTION 0
       22 STORE_NAME 2 (worker)
       24 LOAD_NAME 0 (thread)
       26 LOAD_METHOD 3 (Thread)
       28 CALL_METHOD 0
       30 STORE_NAME 4 (t1)
       32 LOAD_NAME 0 (thread)
       34 LOAD_METHOD 3 (Thread)
       36 CALL_METHOD 0
       38 STORE_NAME 5 (t2)
       40 LOAD_NAME 4 (t1)
       42 LOAD_METHOD 6 (start)
       44 LOAD_NAME 2 (worker)
       46 LOAD_CONST 4 ('one')
       48 LOAD_CONST 5 (0.05)
       50 CALL_METHOD 3
       52 POP_TOP
       54 LOAD_NAME 5 (t2)
       56 LOAD_METHOD 6 (start)
       58 LOAD_NAME 2 (worker)
       60 LOAD_CONST 6 ('two')
       62 LOAD_CONST 7 (0.01)
       64 CALL_METHOD 3
       66 POP_TOP
       68 LOAD_NAME 7 (print)
       70 LOAD_NAME 4 (t1)
       72 LOAD_METHOD 8 (join)
       74 CALL_METHOD 0
       76 LOAD_NAME 5 (t2)
       78 LOAD_METHOD 8 (join)
       80 CALL_METHOD 0
       82 CALL_FUNCTION 2
       84 POP_TOP
       86 LOAD_CONST 1 (None)
       88 RETURN_VALUE
{WORKER}"
    );
    scripts.write("main.py", &main);
    let run = scripts.run_main();
    run.assert_exited();
    assert_eq!(run.lines(), ["done two", "done one", "one! two!"]);

    let threads: Vec<_> = run
        .playground
        .outcomes()
        .filter(|(id, _)| *id != run.main)
        .map(|(_, outcome)| outcome.clone())
        .collect();
    assert_eq!(
        threads,
        [
            SandboxOutcome::Returned("None".to_owned()),
            SandboxOutcome::Returned("None".to_owned())
        ],
        "thread sandboxes finish with the wrapper's return value"
    );
    assert!(run.playground.is_idle());
    assert!(run.playground.parked().is_empty());
}

#[test]
fn sleep_blocks_for_at_least_its_delay() {
    // start = time.monotonic(); time.sleep(0.1); elapsed = time.monotonic() - start
    let scripts = Scripts::new();
    scripts.write(
        "main.py",
        "
code <module>
        0 LOAD_CONST 0 (0)
        2 LOAD_CONST 1 (None)
        4 IMPORT_NAME 0 (time)
        6 STORE_NAME 0 (time)
        8 LOAD_NAME 0 (time)
       10 LOAD_METHOD 1 (monotonic)
       12 CALL_METHOD 0
       14 STORE_NAME 2 (start)
       16 LOAD_NAME 0 (time)
       18 LOAD_METHOD 3 (sleep)
       20 LOAD_CONST 2 (0.1)
       22 CALL_METHOD 1
       24 POP_TOP
       26 LOAD_NAME 0 (time)
       28 LOAD_METHOD 1 (monotonic)
       30 CALL_METHOD 0
       32 LOAD_NAME 2 (start)
       34 BINARY_SUBTRACT
       36 STORE_NAME 4 (elapsed)
       38 LOAD_CONST 1 (None)
       40 RETURN_VALUE
",
    );
    let (mut playground, _output) = scripts.playground();
    let main = playground.spawn_main("main.py");
    let ticks = playground.run_until_idle(Some(1_000)).expect("no fatal error");
    assert_eq!(playground.outcome(main), Some(&SandboxOutcome::Exited(0)));

    let elapsed = match playground.global("__main__", "elapsed") {
        Some(Value::Float(seconds)) => seconds,
        other => panic!("elapsed should be a float, got {other:?}"),
    };
    assert!(elapsed >= 0.099, "slept only {elapsed}s");
    let slept_ticks = usize::try_from(100 / TICK_MS).unwrap();
    assert!(ticks >= slept_ticks, "sleep took {ticks} ticks");
}

#[test]
fn failed_thread_leaves_joiner_parked_until_woken() {
    // def fail(): raise ValueError('worker broke')
    // t = thread.Thread(); t.start(fail); result = t.join()
    let scripts = Scripts::new();
    scripts.write(
        "main.py",
        "
code <module>
        0 LOAD_CONST 0 (0)
        2 LOAD_CONST 1 (None)
        4 IMPORT_NAME 0 (thread)
        6 STORE_NAME 0 (thread)
        8 LOAD_CONST 2 (<code fail>)
       10 LOAD_CONST 3 ('fail')
       12 MAKE_FUNCTION 0
       14 STORE_NAME 1 (fail)
       16 LOAD_NAME 0 (thread)
       18 LOAD_METHOD 2 (Thread)
       20 CALL_METHOD 0
       22 STORE_NAME 3 (t)
       24 LOAD_NAME 3 (t)
       26 LOAD_METHOD 4 (start)
       28 LOAD_NAME 1 (fail)
       30 CALL_METHOD 1
       32 POP_TOP
       34 LOAD_NAME 3 (t)
       36 LOAD_METHOD 5 (join)
       38 CALL_METHOD 0
       40 STORE_NAME 6 (result)
       42 LOAD_CONST 1 (None)
       44 RETURN_VALUE

code fail name=fail
  2     0 LOAD_GLOBAL 0 (ValueError)
        2 LOAD_CONST 0 ('worker broke')
        4 CALL_FUNCTION 1
        6 RAISE_VARARGS 1
",
    );
    let (mut playground, _output) = scripts.playground();
    let main = playground.spawn_main("main.py");
    playground.run_until_idle(Some(1_000)).expect("no fatal error");

    assert!(playground.is_idle(), "a parked sandbox does not keep the playground busy");
    assert_eq!(playground.parked(), vec![main]);
    assert_eq!(playground.outcome(main), None);
    let failure = playground
        .outcomes()
        .find_map(|(id, outcome)| match outcome {
            SandboxOutcome::Failed(record) if id != main => Some(record.clone()),
            _ => None,
        })
        .expect("the thread sandbox failed");
    assert_eq!(failure.exc_type, "ValueError");
    assert_eq!(failure.message, "worker broke");
    assert_eq!(
        failure.traceback.last().map(|entry| entry.function.as_str()),
        Some("fail")
    );

    playground.wake(main, Value::from("rescued")).expect("main is parked");
    playground.run_until_idle(Some(1_000)).expect("no fatal error");
    assert_eq!(playground.outcome(main), Some(&SandboxOutcome::Exited(0)));
    assert_eq!(
        playground.global("__main__", "result").map(|value| value.py_repr()),
        Some("'rescued'".to_owned())
    );
    assert!(playground.wake(main, Value::None).is_err(), "finished sandboxes cannot be woken");
}

fn wait(waiter: &Rc<Waiter>, cx: &mut NativeCx<'_>, args: ArgValues) -> Result<NativeReturn, NativeError> {
    args.check_zero_args("wait")?;
    waiter.get_value(cx)
}

fn publish(waiter: &Rc<Waiter>, cx: &mut NativeCx<'_>, args: ArgValues) -> Result<NativeReturn, NativeError> {
    let value = args.get_one_arg("publish")?;
    waiter.set_value(cx, value);
    Ok(Value::None.into())
}

#[test]
fn host_natives_can_park_scripts_on_a_waiter() {
    // def call(f): return f()
    // def call_with(f, x): return f(x)
    let scripts = Scripts::new();
    scripts.write(
        "main.py",
        "
code <module>
        0 LOAD_CONST 0 (<code call>)
        2 LOAD_CONST 1 ('call')
        4 MAKE_FUNCTION 0
        6 STORE_NAME 0 (call)
        8 LOAD_CONST 2 (<code call_with>)
       10 LOAD_CONST 3 ('call_with')
       12 MAKE_FUNCTION 0
       14 STORE_NAME 1 (call_with)
       16 LOAD_CONST 4 (None)
       18 RETURN_VALUE

code call params=f name=call
        0 LOAD_FAST 0 (f)
        2 CALL_FUNCTION 0
        4 RETURN_VALUE

code call_with params=f,x name=call_with
        0 LOAD_FAST 0 (f)
        2 LOAD_FAST 1 (x)
        4 CALL_FUNCTION 1
        6 RETURN_VALUE
",
    );
    let mut run = scripts.run_main();
    run.assert_exited();
    let call = run.playground.global("__main__", "call").expect("call is defined");
    let call_with = run.playground.global("__main__", "call_with").expect("call_with is defined");

    let waiter = Rc::new(Waiter::new());
    let waiting = run
        .playground
        .spawn_call(call, vec![NativeMethod::value("wait", waiter.clone(), wait)]);
    run.playground.run_until_idle(Some(1_000)).expect("no fatal error");
    assert_eq!(run.playground.parked(), vec![waiting]);
    assert_eq!(waiter.parked(), vec![waiting]);
    assert!(!waiter.is_done());

    let publisher = run.playground.spawn_call(
        call_with,
        vec![NativeMethod::value("publish", waiter.clone(), publish), Value::Int(5)],
    );
    run.playground.run_until_idle(Some(1_000)).expect("no fatal error");
    assert!(waiter.is_done());
    assert_eq!(run.playground.outcome(publisher), Some(&SandboxOutcome::Returned("None".to_owned())));
    assert_eq!(run.playground.outcome(waiting), Some(&SandboxOutcome::Returned("5".to_owned())));
    assert!(run.playground.parked().is_empty());
}
