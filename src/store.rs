//! Token 存储
//!
//! 保存 `(email, token, expiry)` 记录。签发时追加，登出时按 token 过滤删除。
//! 过期记录不会自动删除，验证时会失败；调用 [`TokenStore::remove_expired`]
//! 进行压缩。
//!
//! ## 文件格式
//!
//! ```text
//! a@b.com,b0a6679735f8b46bb2679acf280ff30bd2a9f7fe582e8fd76758381bc90d2e89,08032025
//! ```
//!
//! ## 并发
//!
//! [`FileTokenStore`] 的所有读写都在同一把互斥锁下进行，重写文件时先写临时文件
//! 再原子重命名，进程内并发的登录/登出不会丢失更新。

use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};

use crate::codec::ExpiryDate;
use crate::error::{Error, Result};

/// Token 记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    /// 用户邮箱
    pub email: String,
    /// Token 值
    pub token: String,
    /// 过期日期
    pub expiry: ExpiryDate,
}

impl TokenRecord {
    /// 创建记录
    pub fn new(email: impl Into<String>, token: impl Into<String>, expiry: ExpiryDate) -> Self {
        Self {
            email: email.into(),
            token: token.into(),
            expiry,
        }
    }

    /// 在 `now` 时刻是否有效
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_valid_at(now)
    }

    /// 序列化为一行（不含换行符）
    pub fn to_line(&self) -> String {
        let expiry = self.expiry.to_string();
        join_fields(&[self.email.as_str(), self.token.as_str(), expiry.as_str()])
    }

    /// 从一行解析；少于三列或日期无效时返回 `None`
    pub fn from_line(line: &str) -> Option<Self> {
        Self::from_fields(&split_fields(line))
    }

    fn from_fields(fields: &[String]) -> Option<Self> {
        if fields.len() < 3 {
            return None;
        }
        let expiry = ExpiryDate::parse(&fields[2]).ok()?;
        Some(Self::new(fields[0].clone(), fields[1].clone(), expiry))
    }
}

// ============================================================================
// 存储接口
// ============================================================================

/// Token 存储接口
///
/// 实现此 trait 以提供自定义的存储后端。
pub trait TokenStore: Send + Sync {
    /// 追加一条记录
    fn append(&self, record: &TokenRecord) -> Result<()>;

    /// 全部记录（按写入顺序）
    fn records(&self) -> Result<Vec<TokenRecord>>;

    /// 删除所有匹配 token 的记录，返回删除数量
    fn remove(&self, token: &str) -> Result<usize>;

    /// 删除 `now` 时刻已过期的记录，返回删除数量
    fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize>;

    /// 若不存在相同 token 则追加，返回是否追加
    fn append_if_absent(&self, record: &TokenRecord) -> Result<bool> {
        if self.contains(&record.token)? {
            return Ok(false);
        }
        self.append(record)?;
        Ok(true)
    }

    /// 查找第一条匹配 token 的记录（线性扫描）
    fn find(&self, token: &str) -> Result<Option<TokenRecord>> {
        Ok(self.records()?.into_iter().find(|r| r.token == token))
    }

    /// 是否存在匹配 token 的记录
    fn contains(&self, token: &str) -> Result<bool> {
        Ok(self.find(token)?.is_some())
    }

    /// 记录数量
    fn len(&self) -> Result<usize> {
        Ok(self.records()?.len())
    }

    /// 是否为空
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

// ============================================================================
// 内存存储实现
// ============================================================================

/// 内存存储实现
///
/// 适用于测试或单实例部署，进程退出后数据丢失。
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    records: RwLock<Vec<TokenRecord>>,
}

impl InMemoryTokenStore {
    /// 创建新的内存存储
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for InMemoryTokenStore {
    fn append(&self, record: &TokenRecord) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| Error::storage("lock poisoned"))?;
        records.push(record.clone());
        Ok(())
    }

    fn records(&self) -> Result<Vec<TokenRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| Error::storage("lock poisoned"))?;
        Ok(records.clone())
    }

    fn remove(&self, token: &str) -> Result<usize> {
        let mut records = self
            .records
            .write()
            .map_err(|_| Error::storage("lock poisoned"))?;
        let before = records.len();
        records.retain(|r| r.token != token);
        Ok(before - records.len())
    }

    fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut records = self
            .records
            .write()
            .map_err(|_| Error::storage("lock poisoned"))?;
        let before = records.len();
        records.retain(|r| r.is_valid_at(now));
        Ok(before - records.len())
    }

    fn append_if_absent(&self, record: &TokenRecord) -> Result<bool> {
        let mut records = self
            .records
            .write()
            .map_err(|_| Error::storage("lock poisoned"))?;
        if records.iter().any(|r| r.token == record.token) {
            return Ok(false);
        }
        records.push(record.clone());
        Ok(true)
    }
}

// ============================================================================
// 文件存储实现
// ============================================================================

/// 基于逗号分隔文本文件的存储
///
/// 文件不存在时视为空存储。
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileTokenStore {
    /// 使用指定路径创建存储（不会立即创建文件）
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// 文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>> {
        self.lock.lock().map_err(|_| Error::storage("lock poisoned"))
    }

    fn read_unlocked(&self) -> Result<Vec<TokenRecord>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut skipped = 0usize;
        let records: Vec<TokenRecord> = contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| {
                let record = TokenRecord::from_line(line);
                if record.is_none() {
                    skipped += 1;
                }
                record
            })
            .collect();

        if skipped > 0 {
            tracing::debug!(path = %self.path.display(), skipped, "skipped malformed token rows");
        }

        Ok(records)
    }

    /// 追加一行；文件末尾缺少换行符时先补一个
    fn append_unlocked(&self, record: &TokenRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;

        let mut line = String::new();
        if file.metadata()?.len() > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1))?;
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                line.push('\n');
            }
        }
        line.push_str(&record.to_line());
        line.push('\n');

        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// 先写临时文件再重命名
    fn rewrite_unlocked(&self, lines: &[&str]) -> Result<()> {
        let mut tmp_name = self.path.clone().into_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut contents = String::new();
        for line in lines {
            contents.push_str(line);
            contents.push('\n');
        }

        fs::write(&tmp_path, contents)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// 按字段过滤行，保留的行原样写回（包括无法解析的行）
    fn retain_unlocked(&self, keep: impl Fn(&[String]) -> bool) -> Result<usize> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&str> = contents
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.trim().is_empty())
            .collect();
        let kept: Vec<&str> = lines
            .iter()
            .copied()
            .filter(|line| keep(&split_fields(line)))
            .collect();
        let removed = lines.len() - kept.len();

        if removed > 0 {
            self.rewrite_unlocked(&kept)?;
        }
        Ok(removed)
    }
}

impl TokenStore for FileTokenStore {
    fn append(&self, record: &TokenRecord) -> Result<()> {
        let _guard = self.guard()?;
        self.append_unlocked(record)?;
        tracing::debug!(path = %self.path.display(), email = %record.email, "appended token row");
        Ok(())
    }

    fn records(&self) -> Result<Vec<TokenRecord>> {
        let _guard = self.guard()?;
        self.read_unlocked()
    }

    fn remove(&self, token: &str) -> Result<usize> {
        let _guard = self.guard()?;
        self.retain_unlocked(|fields| fields.get(1).is_none_or(|value| value != token))
    }

    fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let _guard = self.guard()?;
        self.retain_unlocked(|fields| {
            TokenRecord::from_fields(fields).is_none_or(|record| record.is_valid_at(now))
        })
    }

    fn append_if_absent(&self, record: &TokenRecord) -> Result<bool> {
        let _guard = self.guard()?;
        if self.read_unlocked()?.iter().any(|r| r.token == record.token) {
            return Ok(false);
        }
        self.append_unlocked(record)?;
        Ok(true)
    }
}

// ============================================================================
// 记录格式辅助函数
// ============================================================================

/// 拆分一行逗号分隔记录
///
/// 支持双引号包裹的字段（`""` 表示一个引号），字段两端空白会被去除。
pub(crate) fn split_fields(line: &str) -> Vec<String> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Vec::new();
    }

    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());

    fields
}

/// 拼接一行记录，必要时为字段加引号
fn join_fields(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|field| {
            if field.contains([',', '"']) {
                format!("\"{}\"", field.replace('"', "\"\""))
            } else {
                field.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::compute_token;
    use chrono::TimeZone;

    fn record(email: &str, expiry: &str) -> TokenRecord {
        let expiry = ExpiryDate::parse(expiry).unwrap();
        TokenRecord::new(email, compute_token(email, &expiry), expiry)
    }

    #[test]
    fn test_split_fields() {
        assert_eq!(split_fields("a,b,c"), vec!["a", "b", "c"]);
        assert_eq!(split_fields(" a , b "), vec!["a", "b"]);
        assert_eq!(split_fields("\"x,y\",1"), vec!["x,y", "1"]);
        assert_eq!(split_fields("\"say \"\"hi\"\"\",2"), vec!["say \"hi\"", "2"]);
        assert!(split_fields("   ").is_empty());
    }

    #[test]
    fn test_record_line_round_trip() {
        let r = record("a@b.com", "08032025");
        let line = r.to_line();
        assert_eq!(
            line,
            "a@b.com,b0a6679735f8b46bb2679acf280ff30bd2a9f7fe582e8fd76758381bc90d2e89,08032025"
        );
        assert_eq!(TokenRecord::from_line(&line).unwrap(), r);
    }

    #[test]
    fn test_record_from_line_rejects_short_or_bad_date() {
        assert!(TokenRecord::from_line("a@b.com,abc").is_none());
        assert!(TokenRecord::from_line("a@b.com,abc,2025-03-08").is_none());
    }

    #[test]
    fn test_in_memory_append_find_remove() {
        let store = InMemoryTokenStore::new();
        let r = record("a@b.com", "08032025");

        store.append(&r).unwrap();
        store.append(&r).unwrap();
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.find(&r.token).unwrap(), Some(r.clone()));

        assert_eq!(store.remove(&r.token).unwrap(), 2);
        assert_eq!(store.remove(&r.token).unwrap(), 0);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_in_memory_append_if_absent() {
        let store = InMemoryTokenStore::new();
        let r = record("a@b.com", "08032025");

        assert!(store.append_if_absent(&r).unwrap());
        assert!(!store.append_if_absent(&r).unwrap());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_in_memory_remove_expired() {
        let store = InMemoryTokenStore::new();
        store.append(&record("old@b.com", "01012020")).unwrap();
        store.append(&record("new@b.com", "01012099")).unwrap();

        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(store.remove_expired(now).unwrap(), 1);
        assert_eq!(store.records().unwrap()[0].email, "new@b.com");
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(tmp.path().join("tokens.csv"));

        assert!(store.records().unwrap().is_empty());
        assert_eq!(store.remove("anything").unwrap(), 0);
        assert_eq!(store.remove_expired(Utc::now()).unwrap(), 0);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_file_store_append_and_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tokens.csv");
        let store = FileTokenStore::new(&path);

        let a = record("a@b.com", "08032025");
        let b = record("c@d.com", "09032025");
        store.append(&a).unwrap();
        store.append(&b).unwrap();
        store.append(&a).unwrap();

        assert_eq!(store.records().unwrap(), vec![a.clone(), b.clone(), a.clone()]);
        assert_eq!(store.remove(&a.token).unwrap(), 2);
        assert_eq!(store.records().unwrap(), vec![b.clone()]);

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, format!("{}\n", b.to_line()));
    }

    #[test]
    fn test_file_store_skips_malformed_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tokens.csv");
        let good = record("a@b.com", "08032025");
        fs::write(&path, format!("garbage\n{}\nx,y,notadate\n", good.to_line())).unwrap();

        let store = FileTokenStore::new(&path);
        assert_eq!(store.records().unwrap(), vec![good]);
    }

    #[test]
    fn test_file_store_append_after_missing_newline() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tokens.csv");
        let old = record("old@b.com", "01012099");
        fs::write(&path, old.to_line()).unwrap();

        let store = FileTokenStore::new(&path);
        let new = record("a@b.com", "08032099");
        store.append(&new).unwrap();

        assert_eq!(store.records().unwrap(), vec![old.clone(), new.clone()]);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("{}\n{}\n", old.to_line(), new.to_line())
        );
    }

    #[test]
    fn test_file_store_rewrite_keeps_unparsed_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tokens.csv");
        let gone = record("a@b.com", "01012020");
        let kept = record("c@d.com", "01012099");
        fs::write(
            &path,
            format!(
                "{}\nx@y.com,legacy-token,2099-01-01\n{}\nnote without commas\n",
                gone.to_line(),
                kept.to_line()
            ),
        )
        .unwrap();

        let store = FileTokenStore::new(&path);
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(store.remove_expired(now).unwrap(), 1);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!(
                "x@y.com,legacy-token,2099-01-01\n{}\nnote without commas\n",
                kept.to_line()
            )
        );

        // 日期无法解析的行按 token 仍然可以删除
        assert_eq!(store.remove("legacy-token").unwrap(), 1);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("{}\nnote without commas\n", kept.to_line())
        );
    }

    #[test]
    fn test_file_store_append_if_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(tmp.path().join("tokens.csv"));
        let r = record("a@b.com", "08032025");

        assert!(store.append_if_absent(&r).unwrap());
        assert!(!store.append_if_absent(&r).unwrap());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_file_store_concurrent_appends() {
        use std::sync::Arc;
        use std::thread;

        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FileTokenStore::new(tmp.path().join("tokens.csv")));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for j in 0..10 {
                        let email = format!("user{}-{}@example.com", i, j);
                        store.append(&record(&email, "08032025")).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len().unwrap(), 80);
    }
}
