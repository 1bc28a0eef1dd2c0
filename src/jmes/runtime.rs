use super::new_runtime;
use jmespath::Runtime;
use std::cell::RefCell;

thread_local! {
    static RUNTIME: RefCell<Runtime> = RefCell::new(new_runtime());
}

/// Compile and search with the calling thread's runtime. Script workers each get their own.
pub fn with_runtime<R>(f: impl FnOnce(&mut Runtime) -> R) -> R {
    RUNTIME.with(|cell| {
        let mut rt = cell.borrow_mut();
        f(&mut rt)
    })
}
