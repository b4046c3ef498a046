//! 用户目录
//!
//! 邮箱到激活状态的只读映射。运行期间不会修改。
//!
//! ## 文件格式
//!
//! 每行两列 `email,active_flag`，`active_flag` 去除空白后等于 `"1"` 才视为激活。
//! 少于两列的行会被跳过。
//!
//! ```text
//! a@b.com,1
//! old@b.com,0
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{AuthError, Result};
use crate::store::split_fields;

/// 用户
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// 邮箱（唯一键）
    pub email: String,
    /// 是否激活
    pub active: bool,
}

impl User {
    /// 创建用户
    pub fn new(email: impl Into<String>, active: bool) -> Self {
        Self {
            email: email.into(),
            active,
        }
    }
}

/// 用户目录接口
pub trait UserDirectory: Send + Sync {
    /// 按邮箱查找用户
    fn lookup(&self, email: &str) -> Option<User>;

    /// 查找并要求用户处于激活状态
    fn require_active(&self, email: &str) -> Result<User> {
        match self.lookup(email) {
            None => Err(AuthError::UnknownUser(email.to_string()).into()),
            Some(user) if !user.active => Err(AuthError::InactiveUser(email.to_string()).into()),
            Some(user) => Ok(user),
        }
    }
}

/// 内存用户目录
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    users: HashMap<String, bool>,
}

impl InMemoryDirectory {
    /// 创建空目录
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加用户；重复的邮箱以最后一次为准
    pub fn with_user(mut self, email: impl Into<String>, active: bool) -> Self {
        self.users.insert(email.into(), active);
        self
    }

    /// 从文件内容解析
    pub fn parse(contents: &str) -> Self {
        let mut users = HashMap::new();
        for line in contents.lines() {
            let fields = split_fields(line);
            if fields.len() < 2 || fields[0].is_empty() {
                continue;
            }
            users.insert(fields[0].clone(), fields[1] == "1");
        }
        Self { users }
    }

    /// 用户数量
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl UserDirectory for InMemoryDirectory {
    fn lookup(&self, email: &str) -> Option<User> {
        self.users.get(email).map(|&active| User::new(email, active))
    }
}

/// 基于文件的用户目录
///
/// 在加载时一次性读入内存。
#[derive(Debug, Clone, Default)]
pub struct FileDirectory {
    inner: InMemoryDirectory,
}

impl FileDirectory {
    /// 从文件加载
    ///
    /// 文件不存在时返回空目录并记录错误日志，所有登录请求都会被拒绝。
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::error!(path = %path.display(), "user directory file not found");
                String::new()
            }
            Err(e) => return Err(e.into()),
        };

        let inner = InMemoryDirectory::parse(&contents);
        tracing::debug!(path = %path.display(), users = inner.len(), "loaded user directory");
        Ok(Self { inner })
    }

    /// 用户数量
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl UserDirectory for FileDirectory {
    fn lookup(&self, email: &str) -> Option<User> {
        self.inner.lookup(email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::io::Write;

    #[test]
    fn test_parse_flags() {
        let dir = InMemoryDirectory::parse("a@b.com,1\nc@d.com,0\ne@f.com, 1 \ng@h.com,yes\n");

        assert_eq!(dir.len(), 4);
        assert!(dir.lookup("a@b.com").unwrap().active);
        assert!(!dir.lookup("c@d.com").unwrap().active);
        assert!(dir.lookup("e@f.com").unwrap().active);
        assert!(!dir.lookup("g@h.com").unwrap().active);
    }

    #[test]
    fn test_parse_skips_short_rows() {
        let dir = InMemoryDirectory::parse("\nlonely@b.com\n,1\na@b.com,1,extra\n");

        assert_eq!(dir.len(), 1);
        assert!(dir.lookup("lonely@b.com").is_none());
        assert!(dir.lookup("a@b.com").unwrap().active);
    }

    #[test]
    fn test_last_row_wins() {
        let dir = InMemoryDirectory::parse("a@b.com,1\na@b.com,0\n");
        assert!(!dir.lookup("a@b.com").unwrap().active);
    }

    #[test]
    fn test_require_active() {
        let dir = InMemoryDirectory::new()
            .with_user("a@b.com", true)
            .with_user("off@b.com", false);

        assert!(dir.require_active("a@b.com").is_ok());
        assert!(matches!(
            dir.require_active("off@b.com"),
            Err(Error::Auth(AuthError::InactiveUser(_)))
        ));
        assert!(matches!(
            dir.require_active("x@y.com"),
            Err(Error::Auth(AuthError::UnknownUser(_)))
        ));
    }

    #[test]
    fn test_file_directory_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "a@b.com,1").unwrap();
        writeln!(file, "c@d.com,0").unwrap();

        let dir = FileDirectory::load(file.path()).unwrap();
        assert_eq!(dir.len(), 2);
        assert!(dir.lookup("a@b.com").unwrap().active);
    }

    #[test]
    fn test_file_directory_missing_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FileDirectory::load(tmp.path().join("users.csv")).unwrap();
        assert!(dir.is_empty());
    }
}
