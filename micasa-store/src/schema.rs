//! Schema DDL for the tables enumerated in spec §6.
//!
//! Applied with plain `CREATE TABLE IF NOT EXISTS` statements rather than a
//! migration framework's versioned files — there is exactly one schema
//! version in this crate's lifetime so far, and the teacher's own
//! `kube-client` has no analogous migration story to follow (enrichment:
//! grounded in `sqlx`'s own "runtime" query API, which is what the rest of
//! this crate already uses).

pub const CREATE_TABLES: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS plugins (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER REFERENCES plugins(id) ON DELETE CASCADE,
        reference TEXT NOT NULL UNIQUE,
        type TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1
    )"#,
    r#"CREATE TABLE IF NOT EXISTS devices (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        plugin_id INTEGER NOT NULL REFERENCES plugins(id) ON DELETE CASCADE,
        reference TEXT NOT NULL,
        label TEXT NOT NULL,
        name TEXT,
        type INTEGER NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        UNIQUE(plugin_id, reference)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS plugin_settings (
        plugin_id INTEGER NOT NULL REFERENCES plugins(id) ON DELETE CASCADE,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (plugin_id, key)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS device_settings (
        device_id INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (device_id, key)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS user_settings (
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (user_id, key)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS device_counter_history (
        device_id INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
        value INTEGER NOT NULL,
        date TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS device_counter_trends (
        device_id INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
        last INTEGER NOT NULL,
        diff INTEGER NOT NULL,
        date TEXT NOT NULL,
        PRIMARY KEY (device_id, date)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS device_level_history (
        device_id INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
        date TEXT NOT NULL,
        value REAL NOT NULL,
        samples INTEGER NOT NULL,
        PRIMARY KEY (device_id, date)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS device_level_trends (
        device_id INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
        date TEXT NOT NULL,
        min REAL NOT NULL,
        max REAL NOT NULL,
        average REAL NOT NULL,
        PRIMARY KEY (device_id, date)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS device_switch_history (
        device_id INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
        value TEXT NOT NULL,
        date TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS device_text_history (
        device_id INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
        value TEXT NOT NULL,
        date TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS scripts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        code TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1
    )"#,
    r#"CREATE TABLE IF NOT EXISTS timers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        cron TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1
    )"#,
    r#"CREATE TABLE IF NOT EXISTS links (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
        target_device_id INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
        value TEXT NOT NULL,
        target_value TEXT NOT NULL,
        after REAL,
        for_seconds REAL,
        clear INTEGER NOT NULL DEFAULT 0,
        enabled INTEGER NOT NULL DEFAULT 1
    )"#,
    r#"CREATE TABLE IF NOT EXISTS x_device_scripts (
        device_id INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
        script_id INTEGER NOT NULL REFERENCES scripts(id) ON DELETE CASCADE,
        PRIMARY KEY (device_id, script_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS x_timer_scripts (
        timer_id INTEGER NOT NULL REFERENCES timers(id) ON DELETE CASCADE,
        script_id INTEGER NOT NULL REFERENCES scripts(id) ON DELETE CASCADE,
        PRIMARY KEY (timer_id, script_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS x_timer_devices (
        timer_id INTEGER NOT NULL REFERENCES timers(id) ON DELETE CASCADE,
        device_id INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
        value TEXT NOT NULL,
        PRIMARY KEY (timer_id, device_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        username TEXT NOT NULL UNIQUE,
        password TEXT NOT NULL,
        rights INTEGER NOT NULL DEFAULT 0,
        enabled INTEGER NOT NULL DEFAULT 1
    )"#,
];
