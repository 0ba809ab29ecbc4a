use std::time::Duration;

use anyhow::Context;

mod support;

fn wait_for_client_count(env: &support::Env, name: &str, want: u64, timeout: Duration) -> anyhow::Result<()> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if let Ok(doc) = env.list_json() {
            if support::session_field(&doc, name, "clients").and_then(|v| v.as_u64()) == Some(want) {
                return Ok(());
            }
        }
        if std::time::Instant::now() >= deadline {
            anyhow::bail!("timed out waiting for '{}' to reach {} clients", name, want);
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn attach_runs_commands_in_the_shell() -> anyhow::Result<()> {
    let env = support::Env::new()?;
    env.create("attach-basic")?;
    env.wait_for_session("attach-basic", Duration::from_secs(2))?;

    let mut client = env.attach("attach-basic").context("attaching")?;
    client.send_line("echo HELLO_FROM_SHELL")?;
    client.expect_line_containing("HELLO_FROM_SHELL")?;

    env.kill("attach-basic")?;
    Ok(())
}

#[test]
fn detach_leaves_the_session_running() -> anyhow::Result<()> {
    let env = support::Env::new()?;
    env.create("attach-detach")?;
    env.wait_for_session("attach-detach", Duration::from_secs(2))?;

    let mut client = env.attach("attach-detach")?;
    client.send_line("echo still-here")?;
    client.expect_line_containing("still-here")?;

    client.send_detach()?;
    let status = client.wait()?;
    assert!(status.success(), "detach should exit the attach client with status 0");

    // the session itself must still be alive
    let doc = env.list_json()?;
    assert!(support::has_session(&doc, "attach-detach"));

    env.kill("attach-detach")?;
    Ok(())
}

#[test]
fn second_client_sees_output_after_its_own_hello() -> anyhow::Result<()> {
    let env = support::Env::new()?;
    env.create("attach-multi")?;
    env.wait_for_session("attach-multi", Duration::from_secs(2))?;

    let mut a = env.attach("attach-multi")?;
    a.send_line("echo FROM_A")?;
    a.expect_line_containing("FROM_A")?;

    let mut b = env.attach("attach-multi")?;
    wait_for_client_count(&env, "attach-multi", 2, Duration::from_secs(2))?;

    a.send_line("echo SECOND_FROM_A")?;
    a.expect_line_containing("SECOND_FROM_A")?;
    b.expect_line_containing("SECOND_FROM_A")?;

    env.kill("attach-multi")?;
    Ok(())
}
