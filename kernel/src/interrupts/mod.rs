pub mod page_fault;
