//! 延迟注入引用

use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

/// 延迟注入的引用
///
/// 持有者构造时为空，目标组件装配完成后由容器填充一次。
/// 用来打破构造期的循环依赖，目标类型通常是 `dyn Trait`。
pub struct LazyRef<T: ?Sized> {
    cell: OnceCell<Arc<T>>,
}

impl<T: ?Sized> LazyRef<T> {
    /// 创建空引用
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// 取出目标，尚未填充时为 `None`
    pub fn get(&self) -> Option<Arc<T>> {
        self.cell.get().cloned()
    }

    /// 借用目标
    pub fn get_ref(&self) -> Option<&T> {
        self.cell.get().map(|target| target.as_ref())
    }

    /// 是否已填充
    pub fn is_filled(&self) -> bool {
        self.cell.get().is_some()
    }

    /// 填充目标，重复填充时原样返回
    pub fn fill(&self, target: Arc<T>) -> Result<(), Arc<T>> {
        self.cell.set(target)
    }
}

impl<T: ?Sized> Default for LazyRef<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for LazyRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyRef")
            .field("filled", &self.is_filled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Peer: Send + Sync {
        fn id(&self) -> u32;
    }

    struct Node(u32);

    impl Peer for Node {
        fn id(&self) -> u32 {
            self.0
        }
    }

    #[test]
    fn test_fill_once() {
        let peer: LazyRef<dyn Peer> = LazyRef::default();
        assert!(peer.get().is_none());
        assert!(!peer.is_filled());

        assert!(peer.fill(Arc::new(Node(1))).is_ok());
        assert!(peer.fill(Arc::new(Node(2))).is_err());
        assert_eq!(peer.get_ref().map(Peer::id), Some(1));
        assert_eq!(format!("{peer:?}"), "LazyRef { filled: true }");
    }
}
