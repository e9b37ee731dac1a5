//! Thin portable surface over the thread-level OS primitives the transport
//! needs: pinning, naming, and identifying threads.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::*;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_ids_are_stable_and_distinct() {
        let here = current_thread_id();
        assert_eq!(current_thread_id(), here);

        let there = std::thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn thread_name_is_accepted() {
        // longer than the 15 byte linux limit; must truncate, not fail
        std::thread::spawn(|| set_thread_name("a-name-that-is-rather-long").unwrap())
            .join()
            .unwrap();
    }
}
