mod common;

use common::Scripts;
use robot_war_vm::SandboxOutcome;

/// try: <body> / except ZeroDivisionError / except (IOError, IndexError) / re-raise otherwise.
///
/// `body` must be exactly four instructions at offsets 2..8.
fn two_handlers(body: &str) -> String {
    format!(
        "
code <module>
  1     0 SETUP_FINALLY 0 (to 14)
{body}
       10 POP_BLOCK
       12 JUMP_FORWARD 0 (to 68)
  3 >> 14 DUP_TOP
       16 LOAD_NAME 0 (ZeroDivisionError)
       18 JUMP_IF_NOT_EXC_MATCH 0 (to 38)
       20 POP_TOP
       22 POP_TOP
       24 POP_TOP
  4    26 LOAD_CONST 1 ('zero')
       28 STORE_NAME 1 (handled)
       30 POP_EXCEPT
       32 JUMP_FORWARD 0 (to 68)
       34 NOP
       36 NOP
  5 >> 38 DUP_TOP
       40 LOAD_NAME 2 (IOError)
       42 LOAD_NAME 3 (IndexError)
       44 BUILD_TUPLE 2
       46 JUMP_IF_NOT_EXC_MATCH 0 (to 66)
       48 POP_TOP
       50 POP_TOP
       52 POP_TOP
  6    54 LOAD_CONST 2 ('io-or-index')
       56 STORE_NAME 1 (handled)
       58 POP_EXCEPT
       60 JUMP_FORWARD 0 (to 68)
       62 NOP
       64 NOP
    >> 66 RERAISE
  7 >> 68 LOAD_CONST 3 (None)
       70 RETURN_VALUE
"
    )
}

const INDEX_ERROR: &str = "
  2     2 BUILD_LIST 0
        4 LOAD_CONST 0 (5)
        6 BINARY_SUBSCR
        8 POP_TOP";

const ZERO_DIVISION: &str = "
  2     2 LOAD_CONST 4 (1)
        4 LOAD_CONST 5 (0)
        6 BINARY_TRUE_DIVIDE
        8 POP_TOP";

const KEY_ERROR: &str = "
  2     2 BUILD_MAP 0
        4 LOAD_CONST 6 ('k')
        6 BINARY_SUBSCR
        8 POP_TOP";

#[test]
fn index_error_skips_the_first_handler() {
    let scripts = Scripts::new();
    scripts.write("main.py", &two_handlers(INDEX_ERROR));
    let run = scripts.run_main();
    run.assert_exited();
    assert_eq!(run.global("handled"), "'io-or-index'");
}

#[test]
fn zero_division_takes_the_first_handler() {
    let scripts = Scripts::new();
    scripts.write("main.py", &two_handlers(ZERO_DIVISION));
    let run = scripts.run_main();
    run.assert_exited();
    assert_eq!(run.global("handled"), "'zero'");
}

#[test]
fn unmatched_exception_propagates_unchanged() {
    let scripts = Scripts::new();
    scripts.write("main.py", &two_handlers(KEY_ERROR));
    let run = scripts.run_main();
    let SandboxOutcome::Failed(record) = run.outcome() else {
        panic!("expected the KeyError to escape, got {:?}", run.outcome());
    };
    assert_eq!(record.exc_type, "KeyError");
    assert_eq!(record.message, "'k'");
    assert_eq!(record.traceback.len(), 1, "engine frames are hidden: {record}");
    assert_eq!(record.traceback[0].module, "__main__");
    assert_eq!(record.traceback[0].line, Some(2), "the raise site, not the re-raise: {record}");
    assert!(run.playground.global("__main__", "handled").is_none());
}

/// A context manager appending to `log`, whose `__exit__` returns the constructor argument.
fn with_block(suppress: &str) -> String {
    format!(
        "
code <module>
        0 BUILD_LIST 0
        2 STORE_NAME 0 (log)
        4 LOAD_BUILD_CLASS
        6 LOAD_CONST 0 (<code Manager>)
        8 LOAD_CONST 1 ('Manager')
       10 MAKE_FUNCTION 0
       12 LOAD_CONST 1 ('Manager')
       14 CALL_FUNCTION 2
       16 STORE_NAME 1 (Manager)
       18 LOAD_NAME 1 (Manager)
       20 LOAD_CONST 2 ({suppress})
       22 CALL_FUNCTION 1
       24 SETUP_WITH 0 (to 50)
       26 POP_TOP
       28 LOAD_CONST 3 (1)
       30 LOAD_CONST 4 (0)
       32 BINARY_TRUE_DIVIDE
       34 POP_TOP
       36 POP_BLOCK
       38 LOAD_CONST 5 (None)
       40 DUP_TOP
       42 DUP_TOP
       44 CALL_FUNCTION 3
       46 POP_TOP
       48 JUMP_FORWARD 0 (to 66)
    >> 50 WITH_EXCEPT_START
       52 POP_JUMP_IF_TRUE 0 (to 56)
       54 RERAISE
    >> 56 POP_TOP
       58 POP_TOP
       60 POP_TOP
       62 POP_EXCEPT
       64 POP_TOP
    >> 66 LOAD_NAME 0 (log)
       68 LOAD_METHOD 2 (append)
       70 LOAD_CONST 6 ('after')
       72 CALL_METHOD 1
       74 POP_TOP
       76 LOAD_CONST 5 (None)
       78 RETURN_VALUE

code Manager name=Manager
        0 LOAD_NAME 0 (__name__)
        2 STORE_NAME 1 (__module__)
        4 LOAD_CONST 0 (<code Manager.__init__>)
        6 LOAD_CONST 1 ('Manager.__init__')
        8 MAKE_FUNCTION 0
       10 STORE_NAME 2 (__init__)
       12 LOAD_CONST 2 (<code Manager.__enter__>)
       14 LOAD_CONST 3 ('Manager.__enter__')
       16 MAKE_FUNCTION 0
       18 STORE_NAME 3 (__enter__)
       20 LOAD_CONST 4 (<code Manager.__exit__>)
       22 LOAD_CONST 5 ('Manager.__exit__')
       24 MAKE_FUNCTION 0
       26 STORE_NAME 4 (__exit__)
       28 LOAD_CONST 6 (None)
       30 RETURN_VALUE

code Manager.__init__ params=self,suppress name=__init__
        0 LOAD_FAST 1 (suppress)
        2 LOAD_FAST 0 (self)
        4 STORE_ATTR 0 (suppress)
        6 LOAD_CONST 0 (None)
        8 RETURN_VALUE

code Manager.__enter__ params=self name=__enter__
        0 LOAD_GLOBAL 0 (log)
        2 LOAD_METHOD 1 (append)
        4 LOAD_CONST 0 ('enter')
        6 CALL_METHOD 1
        8 POP_TOP
       10 LOAD_FAST 0 (self)
       12 RETURN_VALUE

code Manager.__exit__ params=self,exc_type,exc,tb name=__exit__
        0 LOAD_GLOBAL 0 (log)
        2 LOAD_METHOD 1 (append)
        4 LOAD_FAST 1 (exc_type)
        6 LOAD_ATTR 2 (__name__)
        8 CALL_METHOD 1
       10 POP_TOP
       12 LOAD_FAST 0 (self)
       14 LOAD_ATTR 3 (suppress)
       16 RETURN_VALUE
"
    )
}

#[test]
fn truthy_exit_suppresses_the_exception() {
    let scripts = Scripts::new();
    scripts.write("main.py", &with_block("True"));
    let run = scripts.run_main();
    run.assert_exited();
    assert_eq!(run.global("log"), "['enter', 'ZeroDivisionError', 'after']");
}

#[test]
fn falsy_exit_reraises_after_running_once() {
    let scripts = Scripts::new();
    scripts.write("main.py", &with_block("False"));
    let run = scripts.run_main();
    match run.outcome() {
        SandboxOutcome::Failed(record) => assert_eq!(record.exc_type, "ZeroDivisionError"),
        other => panic!("expected the exception to escape the with-block, got {other:?}"),
    }
    assert_eq!(run.global("log"), "['enter', 'ZeroDivisionError']");
}

#[test]
fn exceptions_cross_frames_and_user_classes_match_by_ancestry() {
    // class Oops(ValueError): pass
    // def risky(n): raise Oops('bad', n)
    // try: risky(3)
    // except ValueError as e: caught = e.args
    let scripts = Scripts::new();
    scripts.write(
        "main.py",
        "
code <module>
  1     0 LOAD_BUILD_CLASS
        2 LOAD_CONST 0 (<code Oops>)
        4 LOAD_CONST 1 ('Oops')
        6 MAKE_FUNCTION 0
        8 LOAD_CONST 1 ('Oops')
       10 LOAD_NAME 0 (ValueError)
       12 CALL_FUNCTION 3
       14 STORE_NAME 1 (Oops)
  3    16 LOAD_CONST 2 (<code risky>)
       18 LOAD_CONST 3 ('risky')
       20 MAKE_FUNCTION 0
       22 STORE_NAME 2 (risky)
  5    24 SETUP_FINALLY 0 (to 40)
  6    26 LOAD_NAME 2 (risky)
       28 LOAD_CONST 4 (3)
       30 CALL_FUNCTION 1
       32 POP_TOP
       34 POP_BLOCK
       36 JUMP_FORWARD 0 (to 68)
       38 NOP
  7 >> 40 DUP_TOP
       42 LOAD_NAME 0 (ValueError)
       44 JUMP_IF_NOT_EXC_MATCH 0 (to 66)
       46 POP_TOP
       48 STORE_NAME 3 (e)
       50 POP_TOP
  8    52 LOAD_NAME 3 (e)
       54 LOAD_ATTR 4 (args)
       56 STORE_NAME 5 (caught)
       58 POP_EXCEPT
       60 JUMP_FORWARD 0 (to 68)
       62 NOP
       64 NOP
    >> 66 RERAISE
    >> 68 LOAD_CONST 5 (None)
       70 RETURN_VALUE

code Oops name=Oops
        0 LOAD_NAME 0 (__name__)
        2 STORE_NAME 1 (__module__)
        4 LOAD_CONST 0 (None)
        6 RETURN_VALUE

code risky params=n
  4     0 LOAD_GLOBAL 0 (Oops)
        2 LOAD_CONST 1 ('bad')
        4 LOAD_FAST 0 (n)
        6 CALL_FUNCTION 2
        8 RAISE_VARARGS 1
",
    );
    let run = scripts.run_main();
    run.assert_exited();
    assert_eq!(run.global("caught"), "('bad', 3)");
}

#[test]
fn unhandled_user_exception_reports_its_class_and_traceback() {
    let scripts = Scripts::new();
    scripts.write(
        "main.py",
        "
code <module>
  1     0 LOAD_BUILD_CLASS
        2 LOAD_CONST 0 (<code Oops>)
        4 LOAD_CONST 1 ('Oops')
        6 MAKE_FUNCTION 0
        8 LOAD_CONST 1 ('Oops')
       10 LOAD_NAME 0 (RuntimeError)
       12 CALL_FUNCTION 3
       14 STORE_NAME 1 (Oops)
  3    16 LOAD_CONST 2 (<code fail>)
       18 LOAD_CONST 3 ('fail')
       20 MAKE_FUNCTION 0
       22 STORE_NAME 2 (fail)
  5    24 LOAD_NAME 2 (fail)
       26 CALL_FUNCTION 0
       28 POP_TOP
       30 LOAD_CONST 4 (None)
       32 RETURN_VALUE

code Oops name=Oops
        0 LOAD_CONST 0 (None)
        2 RETURN_VALUE

code fail
  4     0 LOAD_GLOBAL 0 (Oops)
        2 LOAD_CONST 0 ('broken')
        4 CALL_FUNCTION 1
        6 RAISE_VARARGS 1
",
    );
    let run = scripts.run_main();
    let SandboxOutcome::Failed(record) = run.outcome() else {
        panic!("expected a failure, got {:?}", run.outcome());
    };
    assert_eq!(record.exc_type, "Oops");
    assert_eq!(record.message, "broken");
    let functions: Vec<&str> = record.traceback.iter().map(|entry| entry.function.as_str()).collect();
    assert_eq!(functions, ["<module>", "fail"]);
    assert_eq!(record.traceback[1].line, Some(4));
    let rendered = record.to_string();
    assert!(rendered.starts_with("Traceback (most recent call last):"), "{rendered}");
    assert!(rendered.ends_with("Oops: broken"), "{rendered}");
}

#[test]
fn system_exit_carries_its_code() {
    let scripts = Scripts::new();
    scripts.write(
        "main.py",
        "
code <module>
        0 LOAD_NAME 0 (print)
        2 LOAD_CONST 0 ('leaving')
        4 CALL_FUNCTION 1
        6 POP_TOP
        8 LOAD_NAME 1 (SystemExit)
       10 LOAD_CONST 1 (3)
       12 CALL_FUNCTION 1
       14 RAISE_VARARGS 1
",
    );
    let run = scripts.run_main();
    assert_eq!(run.outcome(), &SandboxOutcome::Exited(3));
    assert_eq!(run.lines(), ["leaving"]);
}

#[test]
fn bare_raise_without_active_exception_is_a_runtime_error() {
    let scripts = Scripts::new();
    scripts.write(
        "main.py",
        "
code <module>
        0 RAISE_VARARGS 0
",
    );
    let run = scripts.run_main();
    match run.outcome() {
        SandboxOutcome::Failed(record) => {
            assert_eq!(record.exc_type, "RuntimeError");
            assert_eq!(record.message, "No active exception to reraise");
        }
        other => panic!("expected RuntimeError, got {other:?}"),
    }
}

#[test]
fn recursion_limit_is_catchable() {
    // def down(): return down()
    // try: down()
    // except RecursionError: hit = True
    let scripts = Scripts::new();
    scripts.write(
        "main.py",
        "
code <module>
        0 LOAD_CONST 0 (<code down>)
        2 LOAD_CONST 1 ('down')
        4 MAKE_FUNCTION 0
        6 STORE_NAME 0 (down)
        8 SETUP_FINALLY 0 (to 20)
       10 LOAD_NAME 0 (down)
       12 CALL_FUNCTION 0
       14 POP_TOP
       16 POP_BLOCK
       18 JUMP_FORWARD 0 (to 42)
    >> 20 DUP_TOP
       22 LOAD_NAME 1 (RecursionError)
       24 JUMP_IF_NOT_EXC_MATCH 0 (to 40)
       26 POP_TOP
       28 POP_TOP
       30 POP_TOP
       32 LOAD_CONST 2 (True)
       34 STORE_NAME 2 (hit)
       36 POP_EXCEPT
       38 JUMP_FORWARD 0 (to 42)
    >> 40 RERAISE
    >> 42 LOAD_CONST 3 (None)
       44 RETURN_VALUE

code down
        0 LOAD_GLOBAL 0 (down)
        2 CALL_FUNCTION 0
        4 RETURN_VALUE
",
    );
    let run = scripts.run_main();
    run.assert_exited();
    assert_eq!(run.global("hit"), "True");
}
