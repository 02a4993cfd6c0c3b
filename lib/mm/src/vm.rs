pub mod addr_space;
pub mod fault;
mod loader;
mod mmap;
pub mod page_table;
pub mod pte;
pub mod user_ptr;
