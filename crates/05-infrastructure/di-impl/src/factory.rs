//! 工厂函数与参数列表
//!
//! 参数列表是指令组成的元组，工厂函数按相同的元数接收解析后的值。
//! 目前支持 0 到 8 个参数。

use crate::directive::{Directive, ResolveContext};
use di_abstractions::InjectionDirective;
use infrastructure_common::DependencyError;

/// 构造参数的注入目标名
pub fn arg_label(index: usize) -> String {
    format!("arg{index}")
}

/// 指令元组
pub trait ArgList: Send + Sync + 'static {
    /// 解析后的值元组
    type Output;

    /// 各参数的描述
    fn describe(&self) -> Vec<InjectionDirective>;

    /// 依次解析
    fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<Self::Output, DependencyError>;
}

/// 工厂函数
pub trait Factory<Args>: Send + Sync + 'static {
    /// 构造结果
    type Output;

    /// 调用
    fn call(&self, args: Args) -> Self::Output;
}

/// 以另一个组件为接收者的工厂方法
pub trait MethodFactory<Recv: ?Sized, Args>: Send + Sync + 'static {
    /// 构造结果
    type Output;

    /// 调用
    fn call(&self, receiver: &Recv, args: Args) -> Self::Output;
}

macro_rules! impl_arity {
    ($($ty:ident $arg:ident $idx:tt),*) => {
        impl<$($ty: Directive),*> ArgList for ($($ty,)*) {
            type Output = ($(<$ty as Directive>::Output,)*);

            fn describe(&self) -> Vec<InjectionDirective> {
                vec![$(self.$idx.describe(&arg_label($idx))),*]
            }

            #[allow(unused_variables)]
            fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<Self::Output, DependencyError> {
                Ok(($(self.$idx.resolve(&arg_label($idx), ctx)?,)*))
            }
        }

        impl<Func, Ret, $($ty),*> Factory<($($ty,)*)> for Func
        where
            Func: Fn($($ty),*) -> Ret + Send + Sync + 'static,
        {
            type Output = Ret;

            fn call(&self, ($($arg,)*): ($($ty,)*)) -> Ret {
                (self)($($arg),*)
            }
        }

        impl<Func, Ret, Recv: ?Sized, $($ty),*> MethodFactory<Recv, ($($ty,)*)> for Func
        where
            Func: Fn(&Recv, $($ty),*) -> Ret + Send + Sync + 'static,
        {
            type Output = Ret;

            fn call(&self, receiver: &Recv, ($($arg,)*): ($($ty,)*)) -> Ret {
                (self)(receiver, $($arg),*)
            }
        }
    };
}

impl_arity!();
impl_arity!(A a 0);
impl_arity!(A a 0, B b 1);
impl_arity!(A a 0, B b 1, C c 2);
impl_arity!(A a 0, B b 1, C c 2, D d 3);
impl_arity!(A a 0, B b 1, C c 2, D d 3, E e 4);
impl_arity!(A a 0, B b 1, C c 2, D d 3, E e 4, F f 5);
impl_arity!(A a 0, B b 1, C c 2, D d 3, E e 4, F f 5, G g 6);
impl_arity!(A a 0, B b 1, C c 2, D d 3, E e 4, F f 5, G g 6, H h 7);
