//! orchestration of the sign/verify/push/pull helper processes
//!
//! each helper is an external program named `rvcs-<op>-<qualifier>` whose
//! last argument is a result file the helper writes on success. Stdin,
//! stdout, and stderr are inherited so operators can interact with helper
//! prompts; the result file is the only structured channel.

mod helper;
mod pull;
mod push;
mod sign;
mod verify;

pub use pull::pull;
pub use push::push;
pub use sign::sign;
pub use verify::verify;
