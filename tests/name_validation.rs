// Every subcommand that takes a name must validate it before touching
// the registry (spec invariant: bad names never create files).
use anyhow::Context;

mod support;

#[test]
fn rejects_invalid_names_without_side_effects() -> anyhow::Result<()> {
    let env = support::Env::new()?;

    for bad in ["../etc", "a b", "", &"a".repeat(100)] {
        let out = env.create(bad).with_context(|| format!("create {:?}", bad))?;
        assert!(!out.status.success(), "create {:?} should fail", bad);
    }

    // no files should have been created at all
    assert!(!env.registry_dir().exists() || std::fs::read_dir(env.registry_dir())?.next().is_none());

    Ok(())
}

#[test]
fn accepts_ordinary_names() -> anyhow::Result<()> {
    let env = support::Env::new()?;

    for good in ["test-ok", "my_session", "v1.2", "ABC123"] {
        let out = env.create(good).with_context(|| format!("create {:?}", good))?;
        assert!(out.status.success(), "create {:?} should succeed: {:?}", good, out);
        env.wait_for_session(good, std::time::Duration::from_secs(2))?;
        env.kill(good)?;
    }

    Ok(())
}
