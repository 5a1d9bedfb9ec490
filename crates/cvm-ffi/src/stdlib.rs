//! Default FFI registrations loaded unless the driver passes `-S`
//! (spec.md §6.1).
//!
//! Only functions whose entire signature is plain integers/doubles are
//! registered here. A `callf` argument word is whatever the VM's register
//! held it had — for a pointer-typed C parameter that's a tagged heap/data
//! address, not a host pointer, so any libc function that would dereference
//! one (`printf`, `strlen`, `memcpy`, ...) cannot be bridged through this
//! generic path; those stay unresolved unless the embedder registers a
//! VM-aware replacement itself.

use std::ffi::c_void;

use crate::FfiTable;

extern "C" {
    fn sqrt(x: f64) -> f64;
    fn pow(x: f64, y: f64) -> f64;
    fn sin(x: f64) -> f64;
    fn cos(x: f64) -> f64;
    fn tan(x: f64) -> f64;
    fn fabs(x: f64) -> f64;
    fn floor(x: f64) -> f64;
    fn ceil(x: f64) -> f64;
    fn exit(code: i32) -> !;
    fn abs(x: i32) -> i32;
    fn labs(x: i64) -> i64;
    fn rand() -> i32;
    fn srand(seed: u32);
}

/// Registers the subset of `<math.h>`/`<stdlib.h>` that takes no pointers.
pub fn register_defaults(table: &mut FfiTable) {
    table.register("sqrt", sqrt as *const c_void, 1, true, false);
    table.register("pow", pow as *const c_void, 2, true, false);
    table.register("sin", sin as *const c_void, 1, true, false);
    table.register("cos", cos as *const c_void, 1, true, false);
    table.register("tan", tan as *const c_void, 1, true, false);
    table.register("fabs", fabs as *const c_void, 1, true, false);
    table.register("floor", floor as *const c_void, 1, true, false);
    table.register("ceil", ceil as *const c_void, 1, true, false);
    table.register("exit", exit as *const c_void, 1, false, false);
    table.register("abs", abs as *const c_void, 1, false, false);
    table.register("labs", labs as *const c_void, 1, false, false);
    table.register("rand", rand as *const c_void, 0, false, false);
    table.register("srand", srand as *const c_void, 1, false, false);
}
