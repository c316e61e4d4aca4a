// Integration tests follow the organization suggested by Matklad:
// https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod architecture;
#[cfg(not(miri))]
mod closed_loop;
#[cfg(not(miri))]
mod real_time;
mod standalone;
