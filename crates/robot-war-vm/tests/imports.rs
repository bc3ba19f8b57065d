mod common;

use std::rc::Rc;

use common::Scripts;
use robot_war_vm::SandboxOutcome;

const UTIL: &str = "
code <module>
        0 LOAD_NAME 0 (print)
        2 LOAD_CONST 0 ('util loaded')
        4 CALL_FUNCTION 1
        6 POP_TOP
        8 LOAD_CONST 1 (1)
       10 STORE_NAME 1 (value)
       12 LOAD_CONST 2 (2)
       14 STORE_NAME 2 (_private)
       16 LOAD_CONST 3 (None)
       18 RETURN_VALUE
";

#[test]
fn repeated_imports_share_one_module() {
    // import util; import other; import util as again
    let scripts = Scripts::new();
    scripts
        .write("util.py", UTIL)
        .write(
            "other.py",
            "
code <module>
        0 LOAD_CONST 0 (0)
        2 LOAD_CONST 1 (None)
        4 IMPORT_NAME 0 (util)
        6 STORE_NAME 0 (util)
        8 LOAD_CONST 1 (None)
       10 RETURN_VALUE
",
        )
        .write(
            "main.py",
            "
code <module>
        0 LOAD_CONST 0 (0)
        2 LOAD_CONST 1 (None)
        4 IMPORT_NAME 0 (util)
        6 STORE_NAME 0 (util)
        8 LOAD_CONST 0 (0)
       10 LOAD_CONST 1 (None)
       12 IMPORT_NAME 1 (other)
       14 STORE_NAME 1 (other)
       16 LOAD_CONST 0 (0)
       18 LOAD_CONST 1 (None)
       20 IMPORT_NAME 0 (util)
       22 STORE_NAME 2 (again)
       24 LOAD_NAME 0 (util)
       26 LOAD_NAME 1 (other)
       28 LOAD_ATTR 0 (util)
       30 IS_OP 0
       32 STORE_NAME 3 (same_from_other)
       34 LOAD_NAME 0 (util)
       36 LOAD_NAME 2 (again)
       38 IS_OP 0
       40 STORE_NAME 4 (same_again)
       42 LOAD_CONST 1 (None)
       44 RETURN_VALUE
",
        );
    let run = scripts.run_main();
    run.assert_exited();
    assert_eq!(run.lines(), ["util loaded"], "the module body runs once");
    assert_eq!(run.global("same_from_other"), "True");
    assert_eq!(run.global("same_again"), "True");

    let cached = run.playground.module("util").expect("util is cached");
    let from_other = run.playground.module("other").and_then(|other| other.get("util"));
    match from_other {
        Some(robot_war_vm::Value::Module(module)) => assert!(Rc::ptr_eq(&module, &cached)),
        other => panic!("other.util should be the cached module, got {other:?}"),
    }
}

/// `pkg/__init__.py`, `pkg/helper.py` and a root-level `helper.py` that must not be picked.
fn package_tree(scripts: &Scripts) {
    let helper = |place: &str| {
        format!(
            "
code <module>
        0 LOAD_CONST 0 ('{place}')
        2 STORE_NAME 0 (where)
        4 LOAD_CONST 1 (None)
        6 RETURN_VALUE
"
        )
    };
    scripts
        .write("helper.py", &helper("root"))
        .write("pkg/helper.py", &helper("pkg"))
        .write(
            "pkg/__init__.py",
            "
code <module>
        0 LOAD_CONST 0 (None)
        2 RETURN_VALUE
",
        )
        .write(
            "pkg/user.py",
            "
code <module>
  1     0 LOAD_CONST 0 (1)
        2 LOAD_CONST 1 (('helper',))
        4 IMPORT_NAME 0
        6 IMPORT_FROM 1 (helper)
        8 STORE_NAME 1 (helper)
       10 POP_TOP
  2    12 LOAD_NAME 1 (helper)
       14 LOAD_ATTR 2 (where)
       16 STORE_NAME 3 (found)
       18 LOAD_CONST 2 (None)
       20 RETURN_VALUE
",
        );
}

#[test]
fn single_dot_resolves_inside_the_package() {
    // import pkg.user; result = pkg.user.found
    let scripts = Scripts::new();
    package_tree(&scripts);
    scripts.write(
        "main.py",
        "
code <module>
        0 LOAD_CONST 0 (0)
        2 LOAD_CONST 1 (None)
        4 IMPORT_NAME 0 (pkg.user)
        6 STORE_NAME 1 (pkg)
        8 LOAD_NAME 1 (pkg)
       10 LOAD_ATTR 2 (user)
       12 LOAD_ATTR 3 (found)
       14 STORE_NAME 4 (result)
       16 LOAD_CONST 1 (None)
       18 RETURN_VALUE
",
    );
    let run = scripts.run_main();
    run.assert_exited();
    assert_eq!(run.global("result"), "'pkg'");
    assert!(run.playground.module("pkg.helper").is_some());
    assert!(run.playground.module("helper").is_none(), "the root helper is never loaded");
}

#[test]
fn implicit_sibling_import_is_linked_into_the_package() {
    // pkg/runner.py: import tools; found = tools.where
    // main.py: import pkg.runner; linked = pkg.tools is pkg.runner.tools; result = pkg.runner.found
    let scripts = Scripts::new();
    package_tree(&scripts);
    scripts
        .write(
            "pkg/tools.py",
            "
code <module>
        0 LOAD_CONST 0 ('tools')
        2 STORE_NAME 0 (where)
        4 LOAD_CONST 1 (None)
        6 RETURN_VALUE
",
        )
        .write(
            "pkg/runner.py",
            "
code <module>
  1     0 LOAD_CONST 0 (0)
        2 LOAD_CONST 1 (None)
        4 IMPORT_NAME 0 (tools)
        6 STORE_NAME 0 (tools)
  2     8 LOAD_NAME 0 (tools)
       10 LOAD_ATTR 1 (where)
       12 STORE_NAME 2 (found)
       14 LOAD_CONST 1 (None)
       16 RETURN_VALUE
",
        )
        .write(
            "main.py",
            "
code <module>
        0 LOAD_CONST 0 (0)
        2 LOAD_CONST 1 (None)
        4 IMPORT_NAME 0 (pkg.runner)
        6 STORE_NAME 1 (pkg)
        8 LOAD_NAME 1 (pkg)
       10 LOAD_ATTR 2 (tools)
       12 LOAD_NAME 1 (pkg)
       14 LOAD_ATTR 3 (runner)
       16 LOAD_ATTR 2 (tools)
       18 IS_OP 0
       20 STORE_NAME 4 (linked)
       22 LOAD_NAME 1 (pkg)
       24 LOAD_ATTR 3 (runner)
       26 LOAD_ATTR 5 (found)
       28 STORE_NAME 6 (result)
       30 LOAD_CONST 1 (None)
       32 RETURN_VALUE
",
        );
    let run = scripts.run_main();
    run.assert_exited();
    assert_eq!(run.global("result"), "'tools'", "runner binds the module, not its package");
    assert_eq!(run.global("linked"), "True");
    assert!(run.playground.module("pkg.tools").is_some());
    assert!(run.playground.module("tools").is_none(), "cached under its dotted name only");
}

#[test]
fn from_package_import_loads_the_submodule() {
    // from pkg import helper; result = helper.where
    let scripts = Scripts::new();
    package_tree(&scripts);
    scripts.write(
        "main.py",
        "
code <module>
        0 LOAD_CONST 0 (0)
        2 LOAD_CONST 1 (('helper',))
        4 IMPORT_NAME 0 (pkg)
        6 IMPORT_FROM 1 (helper)
        8 STORE_NAME 1 (helper)
       10 POP_TOP
       12 LOAD_NAME 1 (helper)
       14 LOAD_ATTR 2 (where)
       16 STORE_NAME 3 (result)
       18 LOAD_CONST 2 (None)
       20 RETURN_VALUE
",
    );
    let run = scripts.run_main();
    run.assert_exited();
    assert_eq!(run.global("result"), "'pkg'");
    let package = run.playground.module("pkg").expect("pkg is loaded");
    assert!(
        matches!(package.get("helper"), Some(robot_war_vm::Value::Module(_))),
        "the submodule is linked into its package"
    );
}

#[test]
fn star_import_copies_public_names() {
    let scripts = Scripts::new();
    scripts.write("util.py", UTIL).write(
        "main.py",
        "
code <module>
        0 LOAD_CONST 0 (0)
        2 LOAD_CONST 1 (('*',))
        4 IMPORT_NAME 0 (util)
        6 IMPORT_STAR
        8 LOAD_CONST 2 (None)
       10 RETURN_VALUE
",
    );
    let run = scripts.run_main();
    run.assert_exited();
    assert_eq!(run.global("value"), "1");
    assert!(run.playground.global("__main__", "_private").is_none());
}

#[test]
fn missing_modules_raise_catchable_import_errors() {
    // try: import nowhere
    // except ImportError as e: message = str(e)
    let scripts = Scripts::new();
    scripts.write(
        "main.py",
        "
code <module>
        0 SETUP_FINALLY 0 (to 14)
        2 LOAD_CONST 0 (0)
        4 LOAD_CONST 1 (None)
        6 IMPORT_NAME 0 (nowhere)
        8 STORE_NAME 0 (nowhere)
       10 POP_BLOCK
       12 JUMP_FORWARD 0 (to 40)
    >> 14 DUP_TOP
       16 LOAD_NAME 1 (ImportError)
       18 JUMP_IF_NOT_EXC_MATCH 0 (to 38)
       20 POP_TOP
       22 STORE_NAME 2 (e)
       24 POP_TOP
       26 LOAD_NAME 3 (str)
       28 LOAD_NAME 2 (e)
       30 CALL_FUNCTION 1
       32 STORE_NAME 4 (message)
       34 POP_EXCEPT
       36 JUMP_FORWARD 0 (to 40)
    >> 38 RERAISE
    >> 40 LOAD_CONST 1 (None)
       42 RETURN_VALUE
",
    );
    let run = scripts.run_main();
    run.assert_exited();
    assert_eq!(run.global("message"), "\"No module named 'nowhere'\"");
}

#[test]
fn unreadable_listing_is_an_import_error() {
    let scripts = Scripts::new();
    scripts.write("broken.py", "code <module>\n 0 FROBNICATE\n").write(
        "main.py",
        "
code <module>
        0 LOAD_CONST 0 (0)
        2 LOAD_CONST 1 (None)
        4 IMPORT_NAME 0 (broken)
        6 POP_TOP
        8 LOAD_CONST 1 (None)
       10 RETURN_VALUE
",
    );
    let run = scripts.run_main();
    match run.outcome() {
        SandboxOutcome::Failed(record) => {
            assert_eq!(record.exc_type, "ImportError");
            assert!(record.message.starts_with("cannot load module 'broken'"), "{}", record.message);
        }
        other => panic!("expected ImportError, got {other:?}"),
    }
}

#[test]
fn relative_import_from_the_main_program_fails() {
    let scripts = Scripts::new();
    scripts.write(
        "main.py",
        "
code <module>
        0 LOAD_CONST 0 (1)
        2 LOAD_CONST 1 (('x',))
        4 IMPORT_NAME 0
        6 POP_TOP
        8 LOAD_CONST 2 (None)
       10 RETURN_VALUE
",
    );
    let run = scripts.run_main();
    match run.outcome() {
        SandboxOutcome::Failed(record) => {
            assert_eq!(record.exc_type, "ImportError");
            assert_eq!(record.message, "attempted relative import with no known parent package");
        }
        other => panic!("expected ImportError, got {other:?}"),
    }
}

#[test]
fn capability_modules_never_touch_the_filesystem() {
    // a root-level time.py is shadowed by the capability module
    // import time; now = time.monotonic() > 0
    let scripts = Scripts::new();
    scripts.write("time.py", UTIL).write(
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
       14 LOAD_CONST 0 (0)
       16 COMPARE_OP 4 (>)
       18 STORE_NAME 2 (positive)
       20 LOAD_CONST 1 (None)
       22 RETURN_VALUE
",
    );
    let run = scripts.run_main();
    run.assert_exited();
    assert_eq!(run.global("positive"), "True");
    assert!(run.lines().is_empty(), "time.py must not run");
    assert!(run.playground.module("time").is_none());
}
