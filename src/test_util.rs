#[cfg(test)]
pub(crate) fn with_temp_home<F, R>(func: F) -> R
where
    F: FnOnce(&std::path::Path) -> R,
{
    static HOME_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
    let _guard = HOME_MUTEX
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let dir = tempfile::tempdir().expect("tempdir");
    let old_home = std::env::var("HOME").ok();
    let old_cwd = std::env::current_dir().ok();
    // SAFETY: HOME is only mutated while HOME_MUTEX is held.
    unsafe { std::env::set_var("HOME", dir.path()) };
    // keep repository-local settings files out of the layering
    std::env::set_current_dir(dir.path()).expect("chdir");
    let result = func(dir.path());
    if let Some(cwd) = old_cwd {
        let _ = std::env::set_current_dir(cwd);
    }
    match old_home {
        Some(old) => unsafe { std::env::set_var("HOME", old) },
        None => unsafe { std::env::remove_var("HOME") },
    }
    result
}
