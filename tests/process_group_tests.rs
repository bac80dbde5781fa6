//! Live stages run in their own process group and leave the global
//! registry once reaped.
//!
//! Kept in a separate test binary so no other test touches the registry.

use archstrap::exec::{CommandNode, ExecContext, Streams};
use archstrap::process_guard::ChildRegistry;

#[test]
fn test_stages_lead_their_own_process_group() {
    let ctx = ExecContext::live();
    let node = CommandNode::new("sh", ["-c", "echo $$; cut -d' ' -f5 /proc/$$/stat"]);
    let outcome = ctx.raise_run(&node, Streams::captured()).unwrap();

    let lines: Vec<&str> = outcome.stdout.lines().map(str::trim).collect();
    assert_eq!(lines.len(), 2, "unexpected output: {:?}", outcome.stdout);
    assert_eq!(lines[0], lines[1], "pid and process group differ");

    let piped = CommandNode::new("echo", ["x"]).pipe(CommandNode::new("cat", Vec::<String>::new()));
    ctx.raise_run(&piped, Streams::captured()).unwrap();

    let registry = ChildRegistry::global();
    assert_eq!(registry.lock().unwrap().count(), 0);
}
