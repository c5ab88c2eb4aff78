//! 临时工作区 - 基础设施层
//!
//! 一次执行独占一个唯一命名的私有目录，脚本写在里面。
//! 工作区随守卫一起释放：无论正常结束、出错、超时还是被取消，目录都会被删除。

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::SandboxError;

/// 脚本文件名
const SCRIPT_FILE_NAME: &str = "main.py";

/// 单次执行的临时工作区
///
/// 职责：
/// - 创建唯一命名的目录并写入代码
/// - Drop 时删除整个目录
/// - 不复用、不共享
pub struct EphemeralWorkspace {
    dir: Option<TempDir>,
    script_path: PathBuf,
}

impl EphemeralWorkspace {
    /// 在 `parent`（为空时使用系统临时目录）下创建工作区并写入代码
    pub fn create(parent: Option<&Path>, label: &str, code: &str) -> Result<Self, SandboxError> {
        let prefix = format!("ctrl-learn-{}-", label);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(|source| SandboxError::Workspace { source })?;

        let script_path = dir.path().join(SCRIPT_FILE_NAME);
        std::fs::write(&script_path, code).map_err(|source| SandboxError::Workspace { source })?;

        debug!("创建临时工作区: {}", dir.path().display());

        Ok(Self {
            dir: Some(dir),
            script_path,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir
            .as_ref()
            .map(TempDir::path)
            .unwrap_or_else(|| Path::new(""))
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }
}

impl Drop for EphemeralWorkspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => debug!("已删除临时工作区: {}", path.display()),
                Err(e) => warn!("删除临时工作区失败 {}: {}", path.display(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let workspace = EphemeralWorkspace::create(Some(root.path()), "1", "print(1)").unwrap();

        let dir = workspace.path().to_path_buf();
        assert!(dir.starts_with(root.path()));
        assert_eq!(
            std::fs::read_to_string(workspace.script_path()).unwrap(),
            "print(1)"
        );

        drop(workspace);
        assert!(!dir.exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_workspaces_are_unique() {
        let root = tempfile::tempdir().unwrap();
        let a = EphemeralWorkspace::create(Some(root.path()), "7", "a").unwrap();
        let b = EphemeralWorkspace::create(Some(root.path()), "7", "b").unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_missing_parent_is_workspace_error() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("does-not-exist");
        let result = EphemeralWorkspace::create(Some(&missing), "1", "x");
        assert!(matches!(result, Err(SandboxError::Workspace { .. })));
    }
}
