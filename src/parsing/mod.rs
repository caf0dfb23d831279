pub mod gerber;
