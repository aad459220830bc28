mod admission;
mod aging;
