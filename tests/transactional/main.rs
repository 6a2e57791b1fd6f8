//! Transactional session integration tests.

mod support;

mod commit_protocol;
mod end_to_end;
mod session_lifecycle;
